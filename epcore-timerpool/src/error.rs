//! Error types for the epcore-timerpool crate.

use thiserror::Error;

/// Failures raised by the timer pool.
#[derive(Debug, Error)]
pub enum TimerPoolError {
    /// `timer_create` failed while acquiring a kernel timer for a bucket.
    #[error("error creating kernel timer: {0}")]
    CreatingTimer(std::io::Error),

    /// `timer_settime` failed while arming a bucket's timer.
    #[error("timer_settime failed: {0}")]
    TimerSetTimeFailed(std::io::Error),

    /// The dispatcher thread could not be started.
    #[error("unable to start the dispatcher thread: {0}")]
    DispatcherSpawn(std::io::Error),

    /// The pool was initialised twice.
    #[error("timer pool already initialized")]
    AlreadyInitialized,

    /// The pool was used before initialisation or after teardown.
    #[error("timer pool not initialized")]
    NotInitialized,
}

/// Specialized `Result` type for timer pool operations.
pub type Result<T> = std::result::Result<T, TimerPoolError>;
