//! Error types for the epcore-sync crate.

use std::io;

use thiserror::Error;

/// Failures raised by the synchronisation and shared-memory primitives.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A kernel primitive (semaphore, mutex, pipe, shm, poll) failed.
    #[error("{context}: {source}")]
    Os {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The object was initialised twice.
    #[error("object already initialized")]
    AlreadyInitialized,

    /// The object was used before initialisation or after teardown.
    #[error("object not initialized")]
    NotInitialized,

    /// The shared-object pool has not been enabled in the configuration.
    #[error("public objects are not enabled")]
    PublicObjectsNotEnabled,

    /// No free slot remains in the shared semaphore or mutex pool.
    #[error("unable to allocate a {0} slot from the shared object pool")]
    NoFreeSlots(&'static str),

    /// A slot index was outside the configured pool.
    #[error("invalid shared object offset {0}")]
    InvalidOffset(i32),

    /// The region was created by a peer with a different size.
    #[error("shared memory region {name} exists with size {existing}, wanted {wanted}")]
    RegionSizeMismatch {
        name: String,
        existing: usize,
        wanted: usize,
    },
}

impl SyncError {
    pub(crate) fn os(context: &'static str) -> Self {
        Self::Os {
            context,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn os_code(context: &'static str, code: i32) -> Self {
        Self::Os {
            context,
            source: io::Error::from_raw_os_error(code),
        }
    }
}

/// Specialized `Result` type for synchronisation operations.
pub type Result<T> = std::result::Result<T, SyncError>;
