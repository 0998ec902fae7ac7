//! Queue backends an event thread can sit on.

use epcore_queue::{EventMessage, PrivateQueue, PublicQueue, QueueMode, Result, ThreadMessage};

/// The inbox abstraction: an event thread only needs push, pop and the
/// ability to mint additional writer handles for senders.
pub trait Inbox<T: ThreadMessage>: Send + Sync + Sized + 'static {
    fn push(&self, msg: T, wait: bool) -> Result<bool>;
    fn pop(&self, wait: bool) -> Result<Option<T>>;
    fn open_writer(&self) -> Result<Self>;
    fn open_reader(&self) -> Result<Self>;
}

impl<T: ThreadMessage> Inbox<T> for PrivateQueue<T> {
    fn push(&self, msg: T, wait: bool) -> Result<bool> {
        Self::push(self, msg, wait)
    }

    fn pop(&self, wait: bool) -> Result<Option<T>> {
        Self::pop(self, wait)
    }

    fn open_writer(&self) -> Result<Self> {
        Ok(Self::open_writer(self))
    }

    fn open_reader(&self) -> Result<Self> {
        self.open(QueueMode::ReadOnly)
    }
}

impl Inbox<EventMessage> for PublicQueue {
    fn push(&self, msg: EventMessage, wait: bool) -> Result<bool> {
        Self::push(self, msg, wait)
    }

    fn pop(&self, wait: bool) -> Result<Option<EventMessage>> {
        Self::pop(self, wait)
    }

    fn open_writer(&self) -> Result<Self> {
        self.open(QueueMode::WriteOnly)
    }

    fn open_reader(&self) -> Result<Self> {
        self.open(QueueMode::ReadOnly)
    }
}
