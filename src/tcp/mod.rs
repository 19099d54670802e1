pub mod config;
pub mod listener;


pub use config::TcpListenerConfig;
pub use listener::TcpListener;
