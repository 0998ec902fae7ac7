//! Error types for the epcore-thread crate.

use thiserror::Error;

/// Failures raised by the thread runtime and per-thread timers.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The thread was started twice.
    #[error("thread already initialized")]
    AlreadyInitialized,

    /// The work group is already at its maximum worker count.
    #[error("work group is at its maximum of {0} workers")]
    WorkerLimitReached(usize),

    /// `timer_create` failed.
    #[error("unable to initialize timer: {0}")]
    TimerUnableToInitialize(std::io::Error),

    /// The timer was started before `init_timer` bound it to a thread.
    #[error("timer not initialized")]
    TimerNotInitialized,

    /// `timer_settime` failed.
    #[error("unable to start timer: {0}")]
    TimerUnableToStart(std::io::Error),

    /// Installing the process-wide timer signal handler failed.
    #[error("unable to register the timer signal handler: {0}")]
    TimerHandlerRegistration(std::io::Error),

    /// The inbox queue failed.
    #[error(transparent)]
    Queue(#[from] epcore_queue::QueueError),

    /// An underlying synchronisation primitive failed.
    #[error(transparent)]
    Sync(#[from] epcore_sync::SyncError),
}

/// Specialized `Result` type for thread operations.
pub type Result<T> = std::result::Result<T, ThreadError>;
