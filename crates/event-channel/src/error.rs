//! Error types for event channel operations.

use thiserror::Error;

/// Errors that can occur while operating a channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Lock poisoned (thread panicked while holding lock).
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread panicked before it could be joined.
    #[error("worker thread panicked")]
    WorkerPanicked,

    /// `stop()` was called from a handler running on the worker thread.
    #[error("cannot stop the channel from its own worker thread")]
    StopFromWorker,

    /// `subscribe_fn` was given a callable with no stable identity.
    #[error("{0} is not a free function; subscribe closures that capture state with subscribe()")]
    NotAFunction(&'static str),

    /// An event was decoded as a different argument list than it was sent with.
    #[error("event type mismatch: expected {expected}, got {actual}")]
    EventTypeMismatch {
        /// Argument list the caller asked for.
        expected: &'static str,
        /// Argument list the event carries.
        actual: &'static str,
    },
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
