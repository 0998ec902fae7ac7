//! Counting semaphores.
//!
//! The counter itself is an atomic; the kernel semaphore is only touched when
//! a decrement actually has to sleep or an increment has to wake a sleeper.
//! Because the layout is plain data, the same [`RawSemaphore`] works on the
//! heap (private) and inside a shared-memory slot (process-shared).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::error::{Result, SyncError};
use crate::pool::SyncObjects;

/// In-place semaphore state. Usable from multiple processes when initialised
/// with `pshared` and placed in shared memory.
#[repr(C)]
pub struct RawSemaphore {
    initialized: AtomicU32,
    count: AtomicI64,
    initial_count: i64,
    sem: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for RawSemaphore {}
unsafe impl Sync for RawSemaphore {}

impl RawSemaphore {
    /// Initialises the semaphore in place.
    ///
    /// # Safety
    ///
    /// `this` must point to memory that lives for as long as any user of the
    /// semaphore and that is shared with other processes only when `pshared`
    /// is true.
    pub unsafe fn init(this: *mut Self, initial: i64, pshared: bool) -> Result<()> {
        let sem = (*this).sem.get();
        if libc::sem_init(sem.cast(), i32::from(pshared), 0) == -1 {
            return Err(SyncError::os("sem_init"));
        }
        (*this).count.store(initial, Ordering::SeqCst);
        (*this).initial_count = initial;
        (*this).initialized.store(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) == 0 {
            return Err(SyncError::NotInitialized);
        }
        Ok(())
    }

    /// Decrements the counter, optionally blocking until it can.
    ///
    /// Returns `Ok(false)` when `wait` is false and the count is exhausted.
    pub fn decrement(&self, wait: bool) -> Result<bool> {
        self.check_initialized()?;

        let val = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if val < 0 {
            if !wait {
                self.count.fetch_add(1, Ordering::AcqRel);
                return Ok(false);
            }
            loop {
                let rc = unsafe { libc::sem_wait(self.sem.get().cast()) };
                if rc == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                self.count.fetch_add(1, Ordering::AcqRel);
                return Err(SyncError::Os {
                    context: "sem_wait",
                    source: err,
                });
            }
        }
        Ok(true)
    }

    /// Increments the counter, waking one sleeper if any.
    pub fn increment(&self) -> Result<()> {
        self.check_initialized()?;

        let val = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if val < 1 && unsafe { libc::sem_post(self.sem.get().cast()) } != 0 {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(SyncError::os("sem_post"));
        }
        Ok(())
    }

    /// Current logical count; negative values mean sleepers.
    pub fn current_count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// The count the semaphore was initialised with.
    pub fn initial_count(&self) -> i64 {
        self.initial_count
    }

    /// Destroys the kernel semaphore. The memory may be reused afterwards.
    pub fn destroy(&self) {
        if self.initialized.swap(0, Ordering::SeqCst) != 0 {
            unsafe { libc::sem_destroy(self.sem.get().cast()) };
        }
    }
}

impl std::fmt::Debug for RawSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSemaphore")
            .field("count", &self.current_count())
            .field("initial_count", &self.initial_count)
            .finish_non_exhaustive()
    }
}

/// A private (in-process) counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    raw: Box<RawSemaphore>,
}

impl Semaphore {
    pub fn new(initial: i64) -> Result<Self> {
        // sem_t must not move once initialised, so the state is boxed first.
        let mut raw: Box<MaybeUninit<RawSemaphore>> = Box::new(MaybeUninit::zeroed());
        unsafe {
            RawSemaphore::init(raw.as_mut_ptr(), initial, false)?;
            Ok(Self {
                raw: Box::from_raw(Box::into_raw(raw).cast()),
            })
        }
    }

    pub fn decrement(&self, wait: bool) -> Result<bool> {
        self.raw.decrement(wait)
    }

    pub fn increment(&self) -> Result<()> {
        self.raw.increment()
    }

    pub fn current_count(&self) -> i64 {
        self.raw.current_count()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.raw.destroy();
    }
}

/// Handle to a process-shared semaphore slot in the [`SyncObjects`] pool.
///
/// The handle caches the slot address; it must not outlive the pool, which is
/// torn down only by [`SyncObjects::uninit`] at process shutdown.
#[derive(Debug)]
pub struct SharedSemaphore {
    index: i32,
    raw: NonNull<RawSemaphore>,
}

unsafe impl Send for SharedSemaphore {}
unsafe impl Sync for SharedSemaphore {}

impl SharedSemaphore {
    /// Allocates a slot from the pool and initialises it with `initial`.
    pub fn alloc(initial: i64) -> Result<Self> {
        let pool = SyncObjects::instance()?;
        let index = pool.alloc_semaphore()?;
        let raw = pool.semaphore_slot(index)?;
        unsafe { RawSemaphore::init(raw.as_ptr(), initial, true)? };
        Ok(Self { index, raw })
    }

    /// Attaches to an already-allocated slot (for example one recorded in a
    /// public queue's control header).
    pub fn attach(index: i32) -> Result<Self> {
        let pool = SyncObjects::instance()?;
        let raw = pool.semaphore_slot(index)?;
        Ok(Self { index, raw })
    }

    /// The pool slot index, suitable for storing in shared memory.
    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn decrement(&self, wait: bool) -> Result<bool> {
        unsafe { self.raw.as_ref() }.decrement(wait)
    }

    pub fn increment(&self) -> Result<()> {
        unsafe { self.raw.as_ref() }.increment()
    }

    pub fn current_count(&self) -> i64 {
        unsafe { self.raw.as_ref() }.current_count()
    }

    /// Destroys the kernel semaphore and returns the slot to the pool.
    ///
    /// Only the last participant of the owning object may call this; other
    /// handles simply drop. The handle must not be used afterwards.
    pub fn destroy(&self) -> Result<()> {
        unsafe { self.raw.as_ref() }.destroy();
        SyncObjects::instance()?.free_semaphore(self.index)
    }
}
