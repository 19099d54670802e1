//! Traffic limiting
//!
//! A [`TrafficLimiter`] is the policy source: given a key and scoping
//! [`LimitOptions`] it yields one [`Limiter`] per traffic direction, or
//! `None` when the direction is unlimited. [`RateLimitedStream`] applies
//! those limiters to a duplex stream.

pub mod local;
pub mod plugin;
pub mod rate;
pub mod stream;

pub use local::StaticTrafficLimiter;
pub use rate::RateLimiter;
pub use stream::{LIMITER_CACHE_TTL, RateLimitedStream, wrap_stream};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::task::{Context, Poll};

/// Scoping attributes sent to the policy source with every lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitOptions {
    /// Network of the connection, e.g. `tcp`
    pub network: String,
    /// Target address of the connection
    pub addr: String,
    /// Authenticated client identity, empty when anonymous
    pub client: String,
    /// Source address of the connection
    pub src: String,
}

impl LimitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = src.into();
        self
    }
}

/// Rate gate for one traffic direction
///
/// `poll_wait(n)` resolves to a grant in `0..=n`. A request of zero
/// resolves immediately to zero; any other request resolves to at least one
/// once the configured rate permits it.
pub trait Limiter: Send + fmt::Debug {
    fn poll_wait(&mut self, cx: &mut Context<'_>, n: usize) -> Poll<usize>;

    /// Configured long-run rate in byte-units per second
    fn rate(&self) -> u64;
}

/// Waits until `limiter` grants part of a request for `n` byte-units
pub async fn wait<L: Limiter + ?Sized>(limiter: &mut L, n: usize) -> usize {
    std::future::poll_fn(|cx| limiter.poll_wait(cx, n)).await
}

/// Policy source for per-direction limiters
///
/// Lookups never fail: an unreachable or misbehaving authority yields
/// `None`, which callers treat as unlimited.
#[async_trait]
pub trait TrafficLimiter: Send + Sync {
    /// Limiter for traffic read from the client
    async fn input(&self, key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>>;

    /// Limiter for traffic written to the client
    async fn output(&self, key: &str, options: &LimitOptions) -> Option<Box<dyn Limiter>>;

    /// Releases any channel held to the policy authority
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
