//! File configuration
//!
//! The binary reads one TOML document describing logging, the metrics
//! exporter, an optional traffic limiter shared by all services, and the
//! services themselves. [`build`] turns the parsed sections into runtime
//! objects.

pub mod build;
pub mod loader;
pub mod schema;

pub use build::{build_service, build_traffic_limiter};
pub use loader::{ConfigError, load_config, validate};
pub use schema::{
    AdmissionConfig, HandlerConfig, LimiterConfig, LogConfig, LogFormat, MetricsConfig,
    RecorderConfig, ServiceConfig, TollgateConfig,
};
