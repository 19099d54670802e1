use std::fmt;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-connection session context
///
/// Created exactly once for every accepted connection and never reused. The
/// context is handed to the recorder, the admission policy and the handler.
/// It carries a cancellation token derived from the owning service so an
/// embedder can cancel every session explicitly; closing a service does not
/// trigger it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    sid: String,
    client_addr: SocketAddr,
    hash_source: String,
    cancel: CancellationToken,
}

impl SessionContext {
    /// Creates a context for a connection from `client_addr`
    pub fn new(client_addr: SocketAddr, parent: &CancellationToken) -> Self {
        Self {
            sid: Uuid::new_v4().simple().to_string(),
            client_addr,
            hash_source: client_addr.ip().to_string(),
            cancel: parent.child_token(),
        }
    }

    /// Unique session identifier
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Observed remote address of the client
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Client address with the port stripped, used as the hash source and
    /// as the `client` metrics label
    pub fn client_ip(&self) -> &str {
        &self.hash_source
    }

    /// Cancellation token scoped to this session
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sid, self.client_addr)
    }
}
