//! Configuration loading from disk.

use super::schema::{HandlerConfig, LimiterConfig, TollgateConfig};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<TollgateConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: TollgateConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Checks the semantic rules serde cannot express, reporting every violation
pub fn validate(config: &TollgateConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.services.is_empty() {
        errors.push("at least one [[services]] entry is required".to_string());
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if service.name.trim().is_empty() {
            errors.push(format!("service on {} has an empty name", service.addr));
        } else if !names.insert(service.name.as_str()) {
            errors.push(format!("duplicate service name {}", service.name));
        }

        match &service.handler {
            HandlerConfig::Echo { buffer_size, .. } if *buffer_size == 0 => {
                errors.push(format!("service {}: buffer_size must be > 0", service.name));
            }
            HandlerConfig::Forward { upstream, .. } if upstream.trim().is_empty() => {
                errors.push(format!("service {}: upstream is required", service.name));
            }
            _ => {}
        }

        if let Some(recorder) = &service.recorder {
            if recorder.file.trim().is_empty() {
                errors.push(format!("service {}: recorder file is required", service.name));
            }
        }
    }

    match &config.limiter {
        Some(LimiterConfig::Http { url, .. }) if !url.starts_with("http://") && !url.starts_with("https://") => {
            errors.push(format!("limiter url {url} must be http(s)"));
        }
        Some(LimiterConfig::Grpc { addr, .. }) if addr.trim().is_empty() => {
            errors.push("limiter addr is required".to_string());
        }
        Some(LimiterConfig::Http { timeout_secs: 0, .. } | LimiterConfig::Grpc { timeout_secs: 0, .. }) => {
            errors.push("limiter timeout_secs must be > 0".to_string());
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::io::Write;

    const FULL: &str = r#"
[log]
level = "debug"
format = "json"

[metrics]
addr = "127.0.0.1:9100"

[limiter]
type = "static"
in = 1024
out = 2048

[limiter.clients."10.0.0.1"]
in = 10
out = 20

[[services]]
name = "echo"
addr = "127.0.0.1:7000"

[services.hooks]
pre_up = ["echo starting"]

[services.admission]
whitelist = true
matchers = ["127.0.0.1", "10.0.0.0/8"]

[services.recorder]
file = "/tmp/clients.log"

[[services]]
name = "relay"
addr = "127.0.0.1:7001"
limit = false

[services.handler]
type = "forward"
upstream = "127.0.0.1:8000"
"#;

    #[test]
    fn test_parse_full_config() {
        let config: TollgateConfig = toml::from_str(FULL).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.metrics.addr, Some("127.0.0.1:9100".parse().unwrap()));
        match config.limiter.as_ref().unwrap() {
            LimiterConfig::Static { input, output, clients } => {
                assert_eq!((*input, *output), (1024, 2048));
                assert_eq!(clients["10.0.0.1"].output, 20);
            }
            other => panic!("unexpected limiter {other:?}"),
        }

        let echo = &config.services[0];
        assert!(echo.limit);
        assert!(echo.nodelay);
        assert!(matches!(echo.handler, HandlerConfig::Echo { buffer_size: 1024, .. }));
        assert_eq!(echo.hooks.pre_up, vec!["echo starting"]);
        assert!(echo.admission.as_ref().unwrap().whitelist);
        assert_eq!(echo.recorder.as_ref().unwrap().sep, "\n");

        let relay = &config.services[1];
        assert!(!relay.limit);
        assert!(matches!(
            &relay.handler,
            HandlerConfig::Forward { upstream, connect_timeout_secs: 10 } if upstream == "127.0.0.1:8000"
        ));
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let config: TollgateConfig = toml::from_str(
            r#"
[limiter]
type = "http"
url = "ftp://quota"

[[services]]
name = "a"
addr = "127.0.0.1:1"

[[services]]
name = "a"
addr = "127.0.0.1:2"

[services.handler]
type = "forward"
upstream = ""
"#,
        )
        .unwrap();

        let Err(ConfigError::Invalid(errors)) = validate(&config) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn test_empty_config_is_invalid() {
        let config: TollgateConfig = toml::from_str("").unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.services.len(), 2);

        assert!(matches!(
            load_config(Path::new("/nonexistent/tollgate.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_load_config_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[services]]\nname = 3\n").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
