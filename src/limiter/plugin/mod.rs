//! Remote quota authorities
//!
//! Both plugins ask an external service for the per-direction rates of a
//! connection. A lookup that fails for any reason is logged and yields
//! `None`, leaving the direction unlimited.

pub mod grpc;
pub mod http;

pub use grpc::{GrpcLimitClient, GrpcTrafficLimiter, LimitService};
pub use http::HttpTrafficLimiter;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin channel is not available")]
    Unavailable,

    #[error("unexpected response status {0}")]
    Status(u16),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

/// Options shared by the remote plugins
#[derive(Debug, Clone)]
pub struct PluginOptions {
    /// Per-request deadline
    pub timeout: Duration,
    /// Sent as a bearer token (HTTP) or `token` metadata (gRPC)
    pub token: Option<String>,
    /// Extra headers attached to every request
    pub headers: HashMap<String, String>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            token: None,
            headers: HashMap::new(),
        }
    }
}

impl PluginOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
