use std::net::SocketAddr;

/// Configuration for a [`TcpListener`](super::TcpListener)
///
/// # Examples
///
/// ```
/// use tollgate::TcpListenerConfig;
///
/// let config = TcpListenerConfig {
///     bind_addr: "127.0.0.1:8080".parse().unwrap(),
///     nodelay: true,
/// };
/// assert_eq!(config.bind_addr.port(), 8080);
/// ```
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    /// Address to bind the listener to
    pub bind_addr: SocketAddr,
    /// Disable Nagle's algorithm on accepted connections
    pub nodelay: bool,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            nodelay: true,
        }
    }
}
