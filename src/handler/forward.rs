use crate::common::{BoxStream, Closer, Handler, SessionContext};
use crate::limiter::{LimitOptions, TrafficLimiter, wrap_stream};
use crate::{Result, TollgateError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Relays every session to a fixed upstream TCP address
pub struct ForwardHandler {
    upstream: String,
    connect_timeout: Duration,
    limiter: Option<Arc<dyn TrafficLimiter>>,
}

impl ForwardHandler {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            connect_timeout: Duration::from_secs(10),
            limiter: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Throttles the client side of every session
    pub fn with_limiter(mut self, limiter: Arc<dyn TrafficLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

#[async_trait]
impl Handler for ForwardHandler {
    async fn handle(&self, ctx: SessionContext, stream: BoxStream) -> Result<()> {
        let mut upstream = timeout(self.connect_timeout, TcpStream::connect(&self.upstream))
            .await
            .map_err(|_| TollgateError::Timeout(format!("connecting to {}", self.upstream)))??;
        debug!(upstream = %self.upstream, "Connected upstream");

        let options = LimitOptions::new()
            .with_network("tcp")
            .with_addr(&self.upstream)
            .with_src(ctx.client_addr().to_string());
        let mut client = wrap_stream(self.limiter.as_ref(), stream, "", options);

        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                debug!("Session cancelled");
            }
            copied = copy_bidirectional(&mut client, &mut upstream) => {
                let (sent, received) = copied?;
                debug!(sent, received, "Relay finished");
            }
        }
        Ok(())
    }

    fn closer(&self) -> Option<&dyn Closer> {
        self.limiter.as_ref().map(|_| self as &dyn Closer)
    }
}

#[async_trait]
impl Closer for ForwardHandler {
    async fn close(&self) -> Result<()> {
        match &self.limiter {
            Some(limiter) => limiter.close().await,
            None => Ok(()),
        }
    }
}
