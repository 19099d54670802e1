//! Co-located policy source with fixed rates.

use super::{LimitOptions, Limiter, RateLimiter, TrafficLimiter};
use async_trait::async_trait;
use std::collections::HashMap;

/// Input and output rates in bytes per second, zero meaning unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rates {
    pub input: u64,
    pub output: u64,
}

/// Traffic limiter answering every lookup from a static table
///
/// A lookup first matches `options.client`, then the host part of
/// `options.src`, and falls back to the default rates.
#[derive(Debug, Clone, Default)]
pub struct StaticTrafficLimiter {
    default: Rates,
    clients: HashMap<String, Rates>,
}

impl StaticTrafficLimiter {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            default: Rates { input, output },
            clients: HashMap::new(),
        }
    }

    /// Overrides the rates for one client identity or source host
    pub fn with_client(mut self, client: impl Into<String>, input: u64, output: u64) -> Self {
        self.clients.insert(client.into(), Rates { input, output });
        self
    }

    pub fn rates_for(&self, options: &LimitOptions) -> Rates {
        let src_host = options
            .src
            .parse::<std::net::SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| options.src.clone());

        self.clients
            .get(&options.client)
            .or_else(|| self.clients.get(&src_host))
            .copied()
            .unwrap_or(self.default)
    }
}

fn limiter_for(rate: u64) -> Option<Box<dyn Limiter>> {
    (rate > 0).then(|| Box::new(RateLimiter::new(rate)) as Box<dyn Limiter>)
}

#[async_trait]
impl TrafficLimiter for StaticTrafficLimiter {
    async fn input(&self, _key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        limiter_for(self.rates_for(options).input)
    }

    async fn output(&self, _key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>> {
        limiter_for(self.rates_for(options).output)
    }
}
