//! Error type for the few genuinely fallible runtime operations.
//!
//! Most of the public API keeps fire-and-forget semantics: malformed input is
//! a no-op and `cancel_timer` reports liveness with a plain `bool`. The
//! operations that can actually fail — spawning a worker thread, driving a
//! context that is already being driven — surface a typed error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HsmError {
    /// The OS refused to spawn the machine's worker thread.
    #[error("failed to spawn worker thread for machine `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// `run` was called while another thread is already draining the same
    /// execution context.
    #[error("execution context is already being driven by another thread")]
    ContextBusy,
}
