//! Configuration schema definitions.

use crate::service::Hooks;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub log: LogConfig,
    pub metrics: MetricsConfig,
    /// Traffic limiter applied to every service with `limit = true`
    pub limiter: Option<LimiterConfig>,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for the `tollgate` target; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Prometheus exporter settings; no address means no exporter
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub addr: Option<SocketAddr>,
}

/// Source of per-connection traffic quotas
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LimiterConfig {
    /// Fixed rates in bytes per second, zero meaning unlimited
    Static {
        #[serde(default, rename = "in")]
        input: u64,
        #[serde(default, rename = "out")]
        output: u64,
        /// Per-client overrides keyed by client identity or source IP
        #[serde(default)]
        clients: HashMap<String, ClientRates>,
    },
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_plugin_timeout")]
        timeout_secs: u64,
    },
    Grpc {
        addr: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_plugin_timeout")]
        timeout_secs: u64,
    },
}

fn default_plugin_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientRates {
    #[serde(default, rename = "in")]
    pub input: u64,
    #[serde(default, rename = "out")]
    pub output: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub addr: SocketAddr,
    #[serde(default = "default_true")]
    pub nodelay: bool,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub admission: Option<AdmissionConfig>,
    #[serde(default)]
    pub recorder: Option<RecorderConfig>,
    /// Apply the top-level `[limiter]` to this service
    #[serde(default = "default_true")]
    pub limit: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerConfig {
    Echo {
        #[serde(default = "default_buffer_size")]
        buffer_size: usize,
        #[serde(default = "default_io_timeout")]
        read_timeout_secs: u64,
        #[serde(default = "default_io_timeout")]
        write_timeout_secs: u64,
    },
    Forward {
        upstream: String,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
    },
}

fn default_buffer_size() -> usize {
    1024
}

fn default_io_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig::Echo {
            buffer_size: default_buffer_size(),
            read_timeout_secs: default_io_timeout(),
            write_timeout_secs: default_io_timeout(),
        }
    }
}

/// Address matchers; a blacklist unless `whitelist` is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub whitelist: bool,
    pub matchers: Vec<String>,
}

/// Appends client addresses to a file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecorderConfig {
    pub file: String,
    #[serde(default = "default_separator")]
    pub sep: String,
}

fn default_separator() -> String {
    "\n".to_string()
}
