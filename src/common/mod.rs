//! Common traits and types used across the tollgate library
//!
//! This module contains the capability traits that the connection-serving
//! engine consumes (listeners, handlers, admission, recorders) and the
//! per-connection session context threaded through them.

pub mod context;
pub mod test_utils;
pub mod traits;

pub use context::SessionContext;
pub use traits::{
    Admission, BoxStream, Closer, Handler, Listener, ListenerError, Recorder, Stream,
};
