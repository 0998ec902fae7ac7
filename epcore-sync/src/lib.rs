#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Synchronisation primitives and shared-memory plumbing.
//!
//! Everything here exists to support cross-thread and cross-process message
//! queues: counting semaphores (in-process and process-shared), recursive
//! mutexes that can live inside a shared-memory region, a pipe-backed
//! [`Event`], named refcounted [`SharedMemory`] regions, and the process-wide
//! [`SyncObjects`] pool that hands out shared semaphore/mutex slots by index.

pub mod error;
pub mod event;
pub mod mutex;
pub mod pool;
pub mod semaphore;
pub mod shmem;

pub use error::{Result, SyncError};
pub use event::Event;
pub use mutex::RawSharedMutex;
pub use pool::{PublicQueueDef, SyncObjects, SyncObjectsConfig, MAX_PUBLIC_QUEUES};
pub use semaphore::{Semaphore, SharedSemaphore};
pub use shmem::SharedMemory;
