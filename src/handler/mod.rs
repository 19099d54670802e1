//! Connection handlers
//!
//! Both handlers optionally wrap the accepted stream in a
//! [`RateLimitedStream`](crate::RateLimitedStream) and release their traffic
//! limiter when the owning service closes.

pub mod echo;
pub mod forward;

pub use echo::{EchoConfig, EchoHandler};
pub use forward::ForwardHandler;
