#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Bounded FIFO message queues.
//!
//! A queue is a ring of `N` slots guarded by two counting semaphores: `free`
//! starts at `N` and `filled` at `0`, so the semaphores answer "is there
//! room?" / "is there data?" and the critical section only has to move the
//! ring pointers. Two variants share the algorithm:
//!
//! - [`PrivateQueue`]: heap-backed, generic over the message type, shared
//!   between threads of one process.
//! - [`PublicQueue`]: the control block and ring live in named shared memory;
//!   the semaphores and mutex are slots in the process-wide
//!   [`epcore_sync::SyncObjects`] pool, so any process can attach by queue id.

pub mod error;
pub mod message;
pub mod private;
pub mod public;

pub use error::{QueueError, Result};
pub use message::{
    EventMessage, MessageData, ThreadMessage, MSG_INIT, MSG_QUIT, MSG_SOCKET_ERROR,
    MSG_SOCKET_EXCEPTION, MSG_SOCKET_READ, MSG_SOCKET_WRITE, MSG_SUSPEND, MSG_TIMER, MSG_USER,
};
pub use private::PrivateQueue;
pub use public::PublicQueue;

/// How a participant opens a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl QueueMode {
    pub(crate) fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub(crate) fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}
