use super::config::TcpListenerConfig;
use crate::common::{BoxStream, Listener, ListenerError};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP source of connections for a service
///
/// `close` may be called from any task; a pending `accept` then resolves with
/// [`ListenerError::Closed`] and the socket is released.
pub struct TcpListener {
    inner: Mutex<Option<tokio::net::TcpListener>>,
    local_addr: SocketAddr,
    nodelay: bool,
    closed: CancellationToken,
}

impl TcpListener {
    pub async fn bind(config: &TcpListenerConfig) -> std::result::Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            addr: config.bind_addr.to_string(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(addr = %local_addr, "TCP listener bound");
        Ok(Self {
            inner: Mutex::new(Some(listener)),
            local_addr,
            nodelay: config.nodelay,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> std::result::Result<(BoxStream, SocketAddr), ListenerError> {
        let guard = tokio::select! {
            _ = self.closed.cancelled() => return Err(ListenerError::Closed),
            guard = self.inner.lock() => guard,
        };
        let Some(listener) = guard.as_ref() else {
            return Err(ListenerError::Closed);
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(ListenerError::Closed),
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(ListenerError::from_accept)?;
                if self.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                }
                debug!(%peer, "Accepted TCP connection");
                Ok((Box::new(stream) as BoxStream, peer))
            }
        }
    }

    async fn close(&self) -> std::result::Result<(), ListenerError> {
        if self.closed.is_cancelled() {
            return Err(ListenerError::Closed);
        }
        self.closed.cancel();
        // a pending accept releases the lock as soon as it sees the cancellation
        self.inner.lock().await.take();
        info!(addr = %self.local_addr, "TCP listener closed");
        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        self.local_addr
    }
}
