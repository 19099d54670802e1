use crate::Result;
use crate::common::SessionContext;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional, ordered byte stream
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type that can be
/// moved onto a connection task.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased accepted connection
pub type BoxStream = Box<dyn Stream>;

/// Errors reported by a [`Listener`]
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Failed to bind the listening socket
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Transient accept failure, the accept loop retries with backoff
    #[error("accept (temporary): {0}")]
    Temporary(#[source] io::Error),

    /// Accept failure that terminates the accept loop
    #[error("accept: {0}")]
    Accept(#[source] io::Error),

    /// The listener has been closed
    #[error("listener closed")]
    Closed,
}

impl ListenerError {
    /// Whether the accept loop should retry after this error
    pub fn is_temporary(&self) -> bool {
        matches!(self, ListenerError::Temporary(_))
    }

    /// Classifies an accept error from the operating system
    ///
    /// Resource exhaustion and aborted handshakes are transient; everything
    /// else is fatal for the listener.
    pub fn from_accept(err: io::Error) -> Self {
        let transient_kind = matches!(
            err.kind(),
            io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
        );
        let transient_os = matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        );

        if transient_kind || transient_os {
            ListenerError::Temporary(err)
        } else {
            ListenerError::Accept(err)
        }
    }
}

/// Source of inbound connections for a service
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next connection
    ///
    /// The service never has more than one `accept` outstanding.
    async fn accept(&self) -> std::result::Result<(BoxStream, SocketAddr), ListenerError>;

    /// Stops accepting; a pending `accept` resolves with [`ListenerError::Closed`]
    async fn close(&self) -> std::result::Result<(), ListenerError>;

    /// Bound local address
    fn addr(&self) -> SocketAddr;
}

/// Resource that can be released explicitly
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Protocol handler serving one accepted connection
#[async_trait]
pub trait Handler: Send + Sync {
    /// Serves `stream` until the session ends
    async fn handle(&self, ctx: SessionContext, stream: BoxStream) -> Result<()>;

    /// Closeable capability, `None` when the handler holds nothing to release
    fn closer(&self) -> Option<&dyn Closer> {
        None
    }
}

/// Admission policy keyed by remote address
#[async_trait]
pub trait Admission: Send + Sync {
    async fn admit(&self, ctx: &SessionContext, addr: &str) -> bool;
}

/// Sink for recorded events
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, ctx: &SessionContext, data: &[u8]) -> Result<()>;
}
