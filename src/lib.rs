//! Tollgate: a connection-serving engine with admission control, lifecycle
//! hooks and pluggable per-connection traffic quotas.
//!
//! A [`Service`] accepts connections from a [`Listener`], records and admits
//! them, and hands each one to a [`Handler`] on its own task. Handlers may
//! wrap their stream in a [`RateLimitedStream`] whose [`Limiter`]s come from a
//! [`TrafficLimiter`]: fixed rates, or a remote authority over HTTP or gRPC.

use thiserror::Error;

/// Error types for the tollgate library
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Connection-level I/O errors (read, write, connect)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener errors (bind, accept, close)
    #[error("Listener error: {0}")]
    Listener(#[from] common::ListenerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Quota authority plugin errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] limiter::plugin::PluginError),

    /// Recorder errors
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Handler errors
    #[error("Handler error: {0}")]
    Handler(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),
}

/// Result type for the tollgate library
pub type Result<T> = std::result::Result<T, TollgateError>;

pub mod admission;
pub mod common;
pub mod config;
pub mod handler;
pub mod limiter;
pub mod observability;
pub mod recorder;
pub mod service;
pub mod tcp;

// Re-export main types for convenience
pub use admission::IpAdmission;
pub use common::{
    Admission, BoxStream, Closer, Handler, Listener, ListenerError, Recorder, SessionContext,
    Stream,
};
pub use handler::{EchoConfig, EchoHandler, ForwardHandler};
pub use limiter::{
    LimitOptions, Limiter, RateLimitedStream, RateLimiter, StaticTrafficLimiter, TrafficLimiter,
};
pub use observability::{Metrics, NoopMetrics, PrometheusMetrics};
pub use recorder::{FileRecorder, RecordKind, RecorderBinding};
pub use service::{Hooks, Service, ServiceOptions};
pub use tcp::{TcpListener, TcpListenerConfig};
