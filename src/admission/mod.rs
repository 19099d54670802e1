//! Address-based admission control.

use crate::common::{Admission, SessionContext};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

/// Admits or denies connections by client IP
///
/// Matchers are plain addresses or CIDR networks. In blacklist mode (the
/// default) a match denies the connection; in whitelist mode only matching
/// addresses are admitted. An address that cannot be parsed never matches.
#[derive(Debug, Clone, Default)]
pub struct IpAdmission {
    whitelist: bool,
    ips: HashSet<IpAddr>,
    nets: Vec<IpNet>,
}

impl IpAdmission {
    pub fn new<I, S>(matchers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut admission = Self::default();
        for matcher in matchers {
            let matcher = matcher.as_ref().trim();
            if matcher.is_empty() {
                continue;
            }
            if let Ok(ip) = matcher.parse::<IpAddr>() {
                admission.ips.insert(ip);
            } else if let Ok(net) = matcher.parse::<IpNet>() {
                admission.nets.push(net);
            } else {
                warn!(matcher, "Ignoring invalid admission matcher");
            }
        }
        admission
    }

    /// Switches to whitelist mode
    pub fn whitelist(mut self, whitelist: bool) -> Self {
        self.whitelist = whitelist;
        self
    }

    fn matches(&self, addr: &str) -> bool {
        let ip = match addr.parse::<SocketAddr>() {
            Ok(addr) => addr.ip(),
            Err(_) => match addr.parse::<IpAddr>() {
                Ok(ip) => ip,
                Err(_) => return false,
            },
        };
        self.ips.contains(&ip) || self.nets.iter().any(|net| net.contains(&ip))
    }
}

#[async_trait]
impl Admission for IpAdmission {
    async fn admit(&self, _ctx: &SessionContext, addr: &str) -> bool {
        let matched = self.matches(addr);
        if self.whitelist { matched } else { !matched }
    }
}
