//! Shared-memory backed queue, addressable by queue id from any process.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use epcore_sync::{RawSharedMutex, SharedMemory, SharedSemaphore, SyncObjects};

use crate::error::{QueueError, Result};
use crate::message::{EventMessage, ThreadMessage};
use crate::QueueMode;

/// Control block at the head of a public queue's region. Plain data only;
/// the mutex and semaphores live in the shared object pool and are referred
/// to by slot index.
#[repr(C)]
struct QueueControl {
    ready: AtomicU32,
    ref_cnt: i32,
    num_readers: i32,
    num_writers: i32,
    multiple_readers: u8,
    multiple_writers: u8,
    msg_cnt: i32,
    head: i32,
    tail: i32,
    mutex_id: i32,
    free_sem_id: i32,
    filled_sem_id: i32,
}

/// A bounded FIFO of [`EventMessage`] living in named shared memory.
///
/// The first participant creates the region and allocates the shared
/// primitives; later participants attach by the same `queue_id`. The last
/// detacher destroys the primitives and the region.
pub struct PublicQueue {
    shmem: SharedMemory,
    mode: QueueMode,
    free: SharedSemaphore,
    filled: SharedSemaphore,
    mutex: NonNull<RawSharedMutex>,
    attached: bool,
    queue_id: i32,
    msg_cnt: i32,
    multiple_writers: bool,
    multiple_readers: bool,
}

unsafe impl Send for PublicQueue {}
unsafe impl Sync for PublicQueue {}

impl PublicQueue {
    /// Creates or attaches the queue `queue_id` with `msg_cnt` slots.
    pub fn init(
        queue_id: i32,
        msg_cnt: i32,
        multiple_writers: bool,
        multiple_readers: bool,
        mode: QueueMode,
    ) -> Result<Self> {
        let size = std::mem::size_of::<QueueControl>()
            + std::mem::size_of::<EventMessage>() * msg_cnt as usize;
        let shmem = SharedMemory::init(&format!("queue-{queue_id}"), 'A', size)?;

        let ctrl = shmem.data_ptr().cast::<QueueControl>();
        let pool = SyncObjects::instance()?;

        let (free, filled, mutex_id) = if shmem.is_creator() {
            let mutex_id = pool.alloc_mutex()?;
            let mutex = pool.mutex_slot(mutex_id)?;
            unsafe { RawSharedMutex::init(mutex.as_ptr())? };

            let free = SharedSemaphore::alloc(i64::from(msg_cnt))?;
            let filled = SharedSemaphore::alloc(0)?;

            unsafe {
                (*ctrl).ref_cnt = 0;
                (*ctrl).num_readers = 0;
                (*ctrl).num_writers = 0;
                (*ctrl).multiple_readers = u8::from(multiple_readers);
                (*ctrl).multiple_writers = u8::from(multiple_writers);
                (*ctrl).msg_cnt = msg_cnt;
                (*ctrl).head = 0;
                (*ctrl).tail = 0;
                (*ctrl).mutex_id = mutex_id;
                (*ctrl).free_sem_id = free.index();
                (*ctrl).filled_sem_id = filled.index();
                (*std::ptr::addr_of!((*ctrl).ready)).store(1, Ordering::SeqCst);
            }
            (free, filled, mutex_id)
        } else {
            unsafe {
                while (*std::ptr::addr_of!((*ctrl).ready)).load(Ordering::SeqCst) == 0 {
                    std::thread::yield_now();
                }
                let free = SharedSemaphore::attach((*ctrl).free_sem_id)?;
                let filled = SharedSemaphore::attach((*ctrl).filled_sem_id)?;
                (free, filled, (*ctrl).mutex_id)
            }
        };

        let mutex = pool.mutex_slot(mutex_id)?;

        let mut queue = Self {
            shmem,
            mode,
            free,
            filled,
            mutex,
            attached: false,
            queue_id,
            msg_cnt,
            multiple_writers,
            multiple_readers,
        };
        queue.attach()?;
        queue.attached = true;

        tracing::debug!(
            queue_id,
            msg_cnt,
            creator = queue.shmem.is_creator(),
            "public queue attached"
        );
        Ok(queue)
    }

    /// Attaches by queue id using the registration recorded in the shared
    /// object pool (`/EpcTools/PublicQueue` options).
    pub fn attach_by_id(queue_id: i32, mode: QueueMode) -> Result<Self> {
        let def = SyncObjects::instance()?
            .public_queue(queue_id)
            .ok_or(QueueError::UnknownPublicQueue(queue_id))?;
        Self::init(
            def.queue_id,
            def.msg_cnt,
            def.multiple_writers,
            def.multiple_readers,
            mode,
        )
    }

    fn ctrl(&self) -> *mut QueueControl {
        self.shmem.data_ptr().cast()
    }

    fn slot(&self, index: i32) -> *mut EventMessage {
        unsafe {
            self.shmem
                .data_ptr()
                .add(std::mem::size_of::<QueueControl>())
                .cast::<EventMessage>()
                .add(index as usize)
        }
    }

    fn mutex(&self) -> &RawSharedMutex {
        unsafe { self.mutex.as_ref() }
    }

    fn attach(&self) -> Result<()> {
        let ctrl = self.ctrl();
        let _guard = self.mutex().lock()?;
        unsafe {
            if self.mode.reads() && (*ctrl).multiple_readers == 0 && (*ctrl).num_readers > 0 {
                return Err(QueueError::MultipleReadersNotAllowed);
            }
            (*ctrl).ref_cnt += 1;
            (*ctrl).num_readers += i32::from(self.mode.reads());
            (*ctrl).num_writers += i32::from(self.mode.writes());
        }
        Ok(())
    }

    /// Opens another handle onto the same queue, as a fresh attachment.
    pub fn open(&self, mode: QueueMode) -> Result<Self> {
        Self::init(
            self.queue_id,
            self.msg_cnt,
            self.multiple_writers,
            self.multiple_readers,
            mode,
        )
    }

    /// The queue identifier shared between processes.
    pub fn queue_id(&self) -> i32 {
        self.queue_id
    }

    /// The maximum number of messages the queue can hold.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.ctrl()).msg_cnt as usize }
    }

    /// The access mode of this handle.
    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Adds `msg`, blocking for a free slot when `wait` is set. Returns
    /// `Ok(false)` when the queue is full and `wait` is false.
    pub fn push(&self, mut msg: EventMessage, wait: bool) -> Result<bool> {
        if !self.mode.writes() {
            return Err(QueueError::NotOpenForWriting);
        }

        if !self.free.decrement(wait)? {
            return Ok(false);
        }

        msg.mark_queued();

        let ctrl = self.ctrl();
        {
            let _guard = if unsafe { (*ctrl).multiple_writers } != 0 {
                Some(self.mutex().lock()?)
            } else {
                None
            };
            unsafe {
                let head = (*ctrl).head;
                self.slot(head).write(msg);
                (*ctrl).head = (head + 1) % (*ctrl).msg_cnt;
            }
        }

        self.filled.increment()?;
        Ok(true)
    }

    /// Removes the oldest message, blocking when `wait` is set. Returns
    /// `Ok(None)` when the queue is empty and `wait` is false.
    pub fn pop(&self, wait: bool) -> Result<Option<EventMessage>> {
        if !self.mode.reads() {
            return Err(QueueError::NotOpenForReading);
        }

        if !self.filled.decrement(wait)? {
            return Ok(None);
        }

        let ctrl = self.ctrl();
        let msg = {
            let _guard = if unsafe { (*ctrl).multiple_readers } != 0 {
                Some(self.mutex().lock()?)
            } else {
                None
            };
            unsafe {
                let tail = (*ctrl).tail;
                let msg = self.slot(tail).read();
                (*ctrl).tail = (tail + 1) % (*ctrl).msg_cnt;
                msg
            }
        };

        self.free.increment()?;
        Ok(Some(msg))
    }
}

impl Drop for PublicQueue {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }

        let ctrl = self.ctrl();
        let last = match self.mutex().lock() {
            Ok(_guard) => unsafe {
                if (*ctrl).ref_cnt == 1 {
                    true
                } else {
                    (*ctrl).ref_cnt -= 1;
                    (*ctrl).num_readers -= i32::from(self.mode.reads());
                    (*ctrl).num_writers -= i32::from(self.mode.writes());
                    false
                }
            },
            Err(_) => false,
        };

        if last {
            // the last participant releases the pooled primitives
            if let Ok(pool) = SyncObjects::instance() {
                let _ = self.free.destroy();
                let _ = self.filled.destroy();
                self.mutex().destroy();
                let _ = pool.free_mutex(unsafe { (*ctrl).mutex_id });
            }
        }
    }
}

impl std::fmt::Debug for PublicQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicQueue")
            .field("mode", &self.mode)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
