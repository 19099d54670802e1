use crate::common::{BoxStream, Closer, Handler, SessionContext};
use crate::limiter::{LimitOptions, TrafficLimiter, wrap_stream};
use crate::{Result, TollgateError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Echo handler settings
///
/// # Examples
///
/// ```
/// use tollgate::EchoConfig;
///
/// let config = EchoConfig::default();
/// assert_eq!(config.buffer_size, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Buffer size for reading/writing data
    pub buffer_size: usize,
    /// Idle time after which a silent client is dropped
    pub read_timeout: Duration,
    /// Deadline for echoing one chunk back
    pub write_timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Writes every byte received back to the client
#[derive(Default)]
pub struct EchoHandler {
    config: EchoConfig,
    limiter: Option<Arc<dyn TrafficLimiter>>,
}

impl EchoHandler {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config,
            limiter: None,
        }
    }

    /// Throttles every session with limiters from `limiter`
    pub fn with_limiter(mut self, limiter: Arc<dyn TrafficLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn echo(&self, ctx: &SessionContext, mut stream: BoxStream) -> Result<()> {
        let mut buffer = vec![0; self.config.buffer_size.max(1)];
        let mut total = 0usize;

        loop {
            let read = tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    debug!("Session cancelled");
                    break;
                }
                read = timeout(self.config.read_timeout, stream.read(&mut buffer)) => read,
            };
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("Read timeout");
                    break;
                }
            };

            if n == 0 {
                debug!("Client closed connection");
                break;
            }

            let write = timeout(self.config.write_timeout, async {
                stream.write_all(&buffer[..n]).await?;
                stream.flush().await
            })
            .await;
            match write {
                Ok(Ok(())) => total += n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(TollgateError::Timeout(format!(
                        "echoing {n} bytes to {}",
                        ctx.client_addr()
                    )));
                }
            }
        }

        debug!(bytes = total, "Echo finished");
        Ok(())
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, ctx: SessionContext, stream: BoxStream) -> Result<()> {
        let options = LimitOptions::new()
            .with_network("tcp")
            .with_src(ctx.client_addr().to_string());
        let stream = wrap_stream(self.limiter.as_ref(), stream, "", options);
        self.echo(&ctx, stream).await
    }

    fn closer(&self) -> Option<&dyn Closer> {
        self.limiter.as_ref().map(|_| self as &dyn Closer)
    }
}

#[async_trait]
impl Closer for EchoHandler {
    async fn close(&self) -> Result<()> {
        match &self.limiter {
            Some(limiter) => limiter.close().await,
            None => Ok(()),
        }
    }
}
