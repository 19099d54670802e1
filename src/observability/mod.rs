//! Observability: structured logging setup and the metrics sink consumed by
//! the connection-serving engine.

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, NoopMetrics, PrometheusMetrics};
