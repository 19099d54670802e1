//! Turns configuration sections into running components.

use super::schema::{HandlerConfig, LimiterConfig, ServiceConfig};
use crate::admission::IpAdmission;
use crate::common::Handler;
use crate::handler::{EchoConfig, EchoHandler, ForwardHandler};
use crate::limiter::plugin::{GrpcTrafficLimiter, HttpTrafficLimiter, PluginOptions};
use crate::limiter::{StaticTrafficLimiter, TrafficLimiter};
use crate::observability::Metrics;
use crate::recorder::{FileRecorder, RecordKind, RecorderBinding};
use crate::service::{Service, ServiceOptions};
use crate::tcp::{TcpListener, TcpListenerConfig};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

fn plugin_options(
    token: &Option<String>,
    headers: &std::collections::HashMap<String, String>,
    timeout_secs: u64,
) -> PluginOptions {
    PluginOptions {
        timeout: Duration::from_secs(timeout_secs),
        token: token.clone(),
        headers: headers.clone(),
    }
}

/// Creates the traffic limiter described by `config`
///
/// Plugin channels are prepared lazily, so this must run inside a tokio
/// runtime but never blocks on the network.
pub fn build_traffic_limiter(name: &str, config: &LimiterConfig) -> Arc<dyn TrafficLimiter> {
    match config {
        LimiterConfig::Static { input, output, clients } => {
            let limiter = clients
                .iter()
                .fold(StaticTrafficLimiter::new(*input, *output), |limiter, (client, rates)| {
                    limiter.with_client(client.clone(), rates.input, rates.output)
                });
            Arc::new(limiter)
        }
        LimiterConfig::Http {
            url,
            token,
            headers,
            timeout_secs,
        } => Arc::new(HttpTrafficLimiter::new(
            name,
            url.clone(),
            plugin_options(token, headers, *timeout_secs),
        )),
        LimiterConfig::Grpc {
            addr,
            token,
            headers,
            timeout_secs,
        } => Arc::new(GrpcTrafficLimiter::new(
            name,
            addr,
            &plugin_options(token, headers, *timeout_secs),
        )),
    }
}

fn build_handler(config: &ServiceConfig, limiter: Option<Arc<dyn TrafficLimiter>>) -> Arc<dyn Handler> {
    match &config.handler {
        HandlerConfig::Echo {
            buffer_size,
            read_timeout_secs,
            write_timeout_secs,
        } => {
            let handler = EchoHandler::new(EchoConfig {
                buffer_size: *buffer_size,
                read_timeout: Duration::from_secs(*read_timeout_secs),
                write_timeout: Duration::from_secs(*write_timeout_secs),
            });
            match limiter {
                Some(limiter) => Arc::new(handler.with_limiter(limiter)),
                None => Arc::new(handler),
            }
        }
        HandlerConfig::Forward {
            upstream,
            connect_timeout_secs,
        } => {
            let handler = ForwardHandler::new(upstream.clone())
                .with_connect_timeout(Duration::from_secs(*connect_timeout_secs));
            match limiter {
                Some(limiter) => Arc::new(handler.with_limiter(limiter)),
                None => Arc::new(handler),
            }
        }
    }
}

/// Binds the listener and assembles one service
///
/// Each service gets its own traffic limiter instance so closing one service
/// leaves the others' quota channels intact.
pub async fn build_service(
    config: &ServiceConfig,
    limiter: Option<&LimiterConfig>,
    metrics: Arc<dyn Metrics>,
) -> Result<Service> {
    let listener = TcpListener::bind(&TcpListenerConfig {
        bind_addr: config.addr,
        nodelay: config.nodelay,
    })
    .await?;

    let limiter = limiter
        .filter(|_| config.limit)
        .map(|limiter| build_traffic_limiter(&config.name, limiter));
    let handler = build_handler(config, limiter);

    let mut options = ServiceOptions::new()
        .with_hooks(config.hooks.clone())
        .with_metrics(metrics);
    if let Some(admission) = &config.admission {
        options = options.with_admission(Arc::new(
            IpAdmission::new(&admission.matchers).whitelist(admission.whitelist),
        ));
    }
    if let Some(recorder) = &config.recorder {
        options = options.with_recorders(vec![RecorderBinding::new(
            RecordKind::ServiceClientAddress,
            Arc::new(FileRecorder::new(&recorder.file, recorder.sep.clone())),
        )]);
    }

    Ok(Service::new(config.name.clone(), Arc::new(listener), handler, options).await)
}
