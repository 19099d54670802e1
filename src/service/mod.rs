//! Connection-serving engine
//!
//! A [`Service`] owns one [`Listener`](crate::Listener) and one
//! [`Handler`](crate::Handler). It accepts connections one at a time, applies
//! recording and admission, and hands every admitted connection to the
//! handler on its own task.

pub mod backoff;
pub mod hooks;
mod options;
mod server;

#[cfg(test)]
mod tests;

pub use backoff::AcceptBackoff;
pub use hooks::{HookPhase, Hooks, run_hooks};
pub use options::ServiceOptions;
pub use server::Service;
