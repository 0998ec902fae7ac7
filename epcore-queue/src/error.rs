//! Error types for the epcore-queue crate.

use thiserror::Error;

/// Failures raised by queue construction and use.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A write was attempted through a handle opened `ReadOnly`.
    #[error("queue not open for writing")]
    NotOpenForWriting,

    /// A read was attempted through a handle opened `WriteOnly`.
    #[error("queue not open for reading")]
    NotOpenForReading,

    /// A second reader tried to attach to a single-reader queue.
    #[error("multiple readers are not allowed on this queue")]
    MultipleReadersNotAllowed,

    /// The queue id has no registration in the shared object pool.
    #[error("public queue {0} is not defined")]
    UnknownPublicQueue(i32),

    /// The queue was used before `init`.
    #[error("queue not initialized")]
    Uninitialized,

    /// An underlying synchronisation primitive failed.
    #[error(transparent)]
    Sync(#[from] epcore_sync::SyncError),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
