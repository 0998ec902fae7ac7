//! Heap-backed bounded queue.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use epcore_sync::Semaphore;
use parking_lot::Mutex;

use crate::error::{QueueError, Result};
use crate::message::ThreadMessage;
use crate::QueueMode;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    free: Semaphore,
    filled: Semaphore,
    write_lock: Mutex<()>,
    read_lock: Mutex<()>,
    multiple_readers: bool,
    multiple_writers: bool,
    readers: AtomicI32,
    writers: AtomicI32,
}

// Slots are only touched according to the semaphore protocol below.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// A bounded FIFO over a heap ring, shared between the threads of one
/// process. Cloning via [`PrivateQueue::open`] produces a new handle with its
/// own access mode; the single-reader rule is enforced at open time.
pub struct PrivateQueue<T: ThreadMessage> {
    shared: Arc<Shared<T>>,
    mode: QueueMode,
}

impl<T: ThreadMessage> PrivateQueue<T> {
    /// Creates the queue with `capacity` slots.
    pub fn new(
        capacity: usize,
        multiple_writers: bool,
        multiple_readers: bool,
        mode: QueueMode,
    ) -> Result<Self> {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(Shared {
            slots,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            free: Semaphore::new(capacity as i64)?,
            filled: Semaphore::new(0)?,
            write_lock: Mutex::new(()),
            read_lock: Mutex::new(()),
            multiple_readers,
            multiple_writers,
            readers: AtomicI32::new(0),
            writers: AtomicI32::new(0),
        });

        shared.readers.fetch_add(i32::from(mode.reads()), Ordering::SeqCst);
        shared.writers.fetch_add(i32::from(mode.writes()), Ordering::SeqCst);

        Ok(Self { shared, mode })
    }

    /// Opens another handle onto the same ring.
    pub fn open(&self, mode: QueueMode) -> Result<Self> {
        if mode.reads() {
            if !self.shared.multiple_readers && self.shared.readers.load(Ordering::SeqCst) > 0 {
                return Err(QueueError::MultipleReadersNotAllowed);
            }
            self.shared.readers.fetch_add(1, Ordering::SeqCst);
        }
        if mode.writes() {
            self.shared.writers.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Self {
            shared: Arc::clone(&self.shared),
            mode,
        })
    }

    /// Opens a write-only handle. Writers are never refused, so this cannot
    /// fail.
    pub fn open_writer(&self) -> Self {
        self.shared.writers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
            mode: QueueMode::WriteOnly,
        }
    }

    /// The maximum number of messages the queue can hold.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// The access mode of this handle.
    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Adds `msg`, blocking for a free slot when `wait` is set. Returns
    /// `Ok(false)` when the queue is full and `wait` is false.
    pub fn push(&self, mut msg: T, wait: bool) -> Result<bool> {
        if !self.mode.writes() {
            return Err(QueueError::NotOpenForWriting);
        }

        if !self.shared.free.decrement(wait)? {
            return Ok(false);
        }

        msg.mark_queued();

        {
            let _guard = self
                .shared
                .multiple_writers
                .then(|| self.shared.write_lock.lock());

            let head = self.shared.head.load(Ordering::Relaxed);
            // SAFETY: `free` granted us this slot; no reader touches it until
            // `filled` is incremented, and head mutation is serialised either
            // by the single-writer contract or by `write_lock`.
            unsafe { (*self.shared.slots[head].get()).write(msg) };
            self.shared
                .head
                .store((head + 1) % self.shared.capacity, Ordering::Release);
        }

        self.shared.filled.increment()?;
        Ok(true)
    }

    /// Removes the oldest message, blocking when `wait` is set. Returns
    /// `Ok(None)` when the queue is empty and `wait` is false.
    pub fn pop(&self, wait: bool) -> Result<Option<T>> {
        if !self.mode.reads() {
            return Err(QueueError::NotOpenForReading);
        }

        if !self.shared.filled.decrement(wait)? {
            return Ok(None);
        }

        let msg = {
            let _guard = self
                .shared
                .multiple_readers
                .then(|| self.shared.read_lock.lock());

            let tail = self.shared.tail.load(Ordering::Relaxed);
            // SAFETY: `filled` guarantees this slot holds a message written
            // by a producer; tail mutation is serialised like head above.
            let msg = unsafe { (*self.shared.slots[tail].get()).assume_init() };
            self.shared
                .tail
                .store((tail + 1) % self.shared.capacity, Ordering::Release);
            msg
        };

        self.shared.free.increment()?;
        Ok(Some(msg))
    }
}

impl<T: ThreadMessage> Drop for PrivateQueue<T> {
    fn drop(&mut self) {
        if self.mode.reads() {
            self.shared.readers.fetch_sub(1, Ordering::SeqCst);
        }
        if self.mode.writes() {
            self.shared.writers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl<T: ThreadMessage> std::fmt::Debug for PrivateQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateQueue")
            .field("capacity", &self.shared.capacity)
            .field("mode", &self.mode)
            .field("filled", &self.shared.filled.current_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventMessage, MessageData, MSG_USER};

    fn msg(n: u64) -> EventMessage {
        EventMessage::with_data(MSG_USER, MessageData::from_u64(n))
    }

    #[test]
    fn test_fifo_order() {
        let q = PrivateQueue::new(4, false, false, QueueMode::ReadWrite).unwrap();
        for n in 1..=4 {
            assert!(q.push(msg(n), false).unwrap());
        }
        for n in 1..=4 {
            let m = q.pop(false).unwrap().unwrap();
            assert_eq!(m.data().as_u64(), n);
        }
        assert!(q.pop(false).unwrap().is_none());
    }

    #[test]
    fn test_full_nowait() {
        let q = PrivateQueue::new(2, false, false, QueueMode::ReadWrite).unwrap();
        assert!(q.push(msg(1), false).unwrap());
        assert!(q.push(msg(2), false).unwrap());
        assert!(!q.push(msg(3), false).unwrap());
        // head did not advance; order preserved
        assert_eq!(q.pop(false).unwrap().unwrap().data().as_u64(), 1);
    }

    #[test]
    fn test_mode_enforcement() {
        let q = PrivateQueue::<EventMessage>::new(2, false, true, QueueMode::ReadWrite).unwrap();
        let w = q.open(QueueMode::WriteOnly).unwrap();
        assert!(matches!(w.pop(false), Err(QueueError::NotOpenForReading)));

        let ro = q.open(QueueMode::ReadOnly).unwrap();
        assert!(matches!(
            ro.push(msg(1), false),
            Err(QueueError::NotOpenForWriting)
        ));
    }

    #[test]
    fn test_single_reader_rule() {
        let q = PrivateQueue::<EventMessage>::new(2, true, false, QueueMode::ReadOnly).unwrap();
        assert!(matches!(
            q.open(QueueMode::ReadOnly),
            Err(QueueError::MultipleReadersNotAllowed)
        ));
        // writers are unaffected
        assert!(q.open(QueueMode::WriteOnly).is_ok());
    }

    #[test]
    fn test_blocking_producer_consumer() {
        let q = PrivateQueue::new(8, false, false, QueueMode::ReadOnly).unwrap();
        let w = q.open(QueueMode::WriteOnly).unwrap();
        let producer = std::thread::spawn(move || {
            for n in 0..100 {
                w.push(msg(n), true).unwrap();
            }
        });
        for n in 0..100 {
            let m = q.pop(true).unwrap().unwrap();
            assert_eq!(m.data().as_u64(), n);
            assert!(m.queued_at_us() > 0);
        }
        producer.join().unwrap();
    }
}
