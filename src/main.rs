use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tollgate::config::{build_service, load_config};
use tollgate::observability::{Metrics, NoopMetrics, PrometheusMetrics, logging, metrics};
use tracing::{error, info, warn};

/// Connection-serving engine with admission control and traffic quotas
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tollgate.toml")]
    config: PathBuf,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }

    logging::init(&config.log);

    let sink: Arc<dyn Metrics> = match config.metrics.addr {
        Some(addr) => {
            metrics::install_prometheus(addr).wrap_err("Failed to start Prometheus exporter")?;
            Arc::new(PrometheusMetrics)
        }
        None => Arc::new(NoopMetrics),
    };

    let mut services = Vec::with_capacity(config.services.len());
    for service in &config.services {
        let built = build_service(service, config.limiter.as_ref(), sink.clone())
            .await
            .wrap_err_with(|| format!("Failed to start service {}", service.name))?;
        services.push(Arc::new(built));
    }

    let mut running = JoinSet::new();
    for service in &services {
        let service = service.clone();
        running.spawn(async move {
            let result = service.serve().await;
            (service.name().to_string(), result)
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping services");
        }
        Some(finished) = running.join_next() => {
            match finished {
                Ok((name, result)) => warn!(service = %name, ?result, "Service stopped unexpectedly"),
                Err(e) => error!(error = %e, "Service task failed"),
            }
        }
    }

    for service in &services {
        if let Err(e) = service.close().await {
            warn!(service = %service.name(), error = %e, "Failed to close service");
        }
    }
    while running.join_next().await.is_some() {}

    info!("Tollgate stopped");
    Ok(())
}
