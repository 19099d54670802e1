use super::backoff::AcceptBackoff;
use super::hooks::{HookPhase, run_hooks};
use super::options::ServiceOptions;
use crate::common::{BoxStream, Handler, Listener, ListenerError, SessionContext};
use crate::observability::Metrics;
use crate::observability::metrics::{
    SERVICE_HANDLER_ERRORS_COUNTER, SERVICE_REQUEST_DURATION_OBSERVER, SERVICE_REQUESTS_COUNTER,
    SERVICE_REQUESTS_IN_FLIGHT_GAUGE, SERVICES_GAUGE,
};
use crate::recorder::RecordKind;
use crate::{Result, TollgateError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// A named listener/handler pair with admission, recording and metrics
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tollgate::{EchoHandler, Service, ServiceOptions, TcpListener, TcpListenerConfig};
///
/// #[tokio::main]
/// async fn main() -> tollgate::Result<()> {
///     let listener = TcpListener::bind(&TcpListenerConfig::default()).await?;
///     let service = Service::new(
///         "echo",
///         Arc::new(listener),
///         Arc::new(EchoHandler::default()),
///         ServiceOptions::default(),
///     )
///     .await;
///     service.serve().await
/// }
/// ```
pub struct Service {
    name: Arc<str>,
    listener: Arc<dyn Listener>,
    handler: Arc<dyn Handler>,
    options: ServiceOptions,
    root: CancellationToken,
}

impl Service {
    /// Creates the service and runs its pre-up commands
    pub async fn new(
        name: impl Into<String>,
        listener: Arc<dyn Listener>,
        handler: Arc<dyn Handler>,
        options: ServiceOptions,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        run_hooks(&name, HookPhase::PreUp, &options.hooks).await;

        Self {
            name,
            listener,
            handler,
            options,
            root: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound address of the listener
    pub fn addr(&self) -> SocketAddr {
        self.listener.addr()
    }

    /// Parent token of every session context
    ///
    /// Cancelling it asks all running sessions to stop; [`Service::close`]
    /// does not do this on its own.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.root
    }

    /// Runs post-up commands, then accepts connections until the listener fails
    ///
    /// Temporary accept errors are retried with a capped backoff. Any other
    /// error, including [`ListenerError::Closed`] after [`Service::close`],
    /// ends the loop and is returned.
    pub async fn serve(&self) -> Result<()> {
        run_hooks(&self.name, HookPhase::PostUp, &self.options.hooks).await;

        let _serving = GaugeGuard::new(
            self.options.metrics.clone(),
            SERVICES_GAUGE,
            vec![("service", self.name.to_string())],
        );
        info!(service = %self.name, addr = %self.addr(), "Service listening");

        let mut backoff = AcceptBackoff::new();
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if e.is_temporary() => {
                    let delay = backoff.next_delay();
                    warn!(service = %self.name, error = %e, ?delay, "Accept failed, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(ListenerError::Closed) => {
                    info!(service = %self.name, "Listener closed");
                    return Err(ListenerError::Closed.into());
                }
                Err(e) => {
                    error!(service = %self.name, error = %e, "Accept failed");
                    return Err(e.into());
                }
            };
            backoff.reset();

            let ctx = SessionContext::new(peer, &self.root);
            self.record_client(&ctx).await;

            if let Some(admission) = &self.options.admission {
                let remote = peer.to_string();
                if !admission.admit(&ctx, &remote).await {
                    debug!(service = %self.name, sid = %ctx.sid(), client = %remote, "Connection denied by admission");
                    drop(stream);
                    continue;
                }
            }

            self.dispatch(ctx, stream);
        }
    }

    async fn record_client(&self, ctx: &SessionContext) {
        let Some(binding) = self
            .options
            .recorders
            .iter()
            .find(|binding| binding.kind == RecordKind::ServiceClientAddress)
        else {
            return;
        };

        if let Err(e) = binding.recorder.record(ctx, ctx.client_ip().as_bytes()).await {
            warn!(service = %self.name, sid = %ctx.sid(), kind = %binding.kind, error = %e, "Failed to record client address");
        }
    }

    fn dispatch(&self, ctx: SessionContext, stream: BoxStream) {
        let name = self.name.clone();
        let handler = self.handler.clone();
        let metrics = self.options.metrics.clone();
        let span = tracing::info_span!("session", service = %name, sid = %ctx.sid(), client = %ctx.client_addr());

        tokio::spawn(
            async move {
                let client = ctx.client_ip().to_string();
                let labels = [("service", &*name), ("client", client.as_str())];
                metrics.increment_counter(SERVICE_REQUESTS_COUNTER, &labels);
                let _in_flight = InFlightGuard::new(metrics.clone(), name.to_string(), client.clone());

                debug!("Session started");
                match handler.handle(ctx, stream).await {
                    Ok(()) => debug!("Session finished"),
                    Err(e) => {
                        error!(error = %e, "Handler failed");
                        metrics.increment_counter(SERVICE_HANDLER_ERRORS_COUNTER, &labels);
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Stops the service
    ///
    /// Runs pre-down commands, releases the handler if it is closeable, closes
    /// the listener and finally runs post-down commands, even when an earlier
    /// step failed. Returns the listener's close result. In-flight sessions
    /// keep running.
    pub async fn close(&self) -> Result<()> {
        run_hooks(&self.name, HookPhase::PreDown, &self.options.hooks).await;

        if let Some(closer) = self.handler.closer() {
            if let Err(e) = closer.close().await {
                warn!(service = %self.name, error = %e, "Failed to close handler");
            }
        }

        let result = self.listener.close().await.map_err(TollgateError::from);
        if let Err(e) = &result {
            warn!(service = %self.name, error = %e, "Failed to close listener");
        }

        run_hooks(&self.name, HookPhase::PostDown, &self.options.hooks).await;
        info!(service = %self.name, "Service closed");
        result
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("addr", &self.addr())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Holds a gauge up for as long as it lives
struct GaugeGuard {
    metrics: Arc<dyn Metrics>,
    name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl GaugeGuard {
    fn new(metrics: Arc<dyn Metrics>, name: &'static str, labels: Vec<(&'static str, String)>) -> Self {
        let guard = Self { metrics, name, labels };
        guard.metrics.increment_gauge(name, &guard.borrowed());
        guard
    }

    fn borrowed(&self) -> Vec<(&'static str, &str)> {
        self.labels.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.metrics.decrement_gauge(self.name, &self.borrowed());
    }
}

/// Tracks one running session: in-flight gauge plus duration on drop
struct InFlightGuard {
    gauge: GaugeGuard,
    service: String,
    started: Instant,
}

impl InFlightGuard {
    fn new(metrics: Arc<dyn Metrics>, service: String, client: String) -> Self {
        Self {
            gauge: GaugeGuard::new(
                metrics,
                SERVICE_REQUESTS_IN_FLIGHT_GAUGE,
                vec![("service", service.clone()), ("client", client)],
            ),
            service,
            started: Instant::now(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.metrics.observe_duration(
            SERVICE_REQUEST_DURATION_OBSERVER,
            &[("service", self.service.as_str())],
            self.started.elapsed(),
        );
    }
}
