//! Process-shared recursive mutex.
//!
//! In-process locking uses `parking_lot` throughout the workspace; this type
//! only exists for state that lives in shared memory, where the lock word has
//! to be a `PTHREAD_PROCESS_SHARED` pthread mutex.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, SyncError};

/// In-place recursive mutex, safe to share between processes when placed in a
/// shared-memory region.
#[repr(C)]
pub struct RawSharedMutex {
    initialized: AtomicU32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawSharedMutex {}
unsafe impl Sync for RawSharedMutex {}

impl RawSharedMutex {
    /// Initialises the mutex in place.
    ///
    /// # Safety
    ///
    /// `this` must point to zeroed memory that outlives every user, mapped at
    /// a stable address in each participating process.
    pub unsafe fn init(this: *mut Self) -> Result<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let rc = libc::pthread_mutexattr_init(&mut attr);
        if rc != 0 {
            return Err(SyncError::os_code("pthread_mutexattr_init", rc));
        }
        let rc = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if rc != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(SyncError::os_code("pthread_mutexattr_setpshared", rc));
        }
        let rc = libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
        if rc != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(SyncError::os_code("pthread_mutexattr_settype", rc));
        }
        let rc = libc::pthread_mutex_init((*this).mutex.get(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if rc != 0 {
            return Err(SyncError::os_code("pthread_mutex_init", rc));
        }
        (*this).initialized.store(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) != 0
    }

    /// Locks the mutex, returning a guard that unlocks on drop.
    pub fn lock(&self) -> Result<SharedMutexGuard<'_>> {
        if !self.is_initialized() {
            return Err(SyncError::NotInitialized);
        }
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        if rc != 0 {
            return Err(SyncError::os_code("pthread_mutex_lock", rc));
        }
        Ok(SharedMutexGuard { mutex: self })
    }

    /// Attempts the lock without blocking.
    pub fn try_lock(&self) -> Result<Option<SharedMutexGuard<'_>>> {
        if !self.is_initialized() {
            return Err(SyncError::NotInitialized);
        }
        match unsafe { libc::pthread_mutex_trylock(self.mutex.get()) } {
            0 => Ok(Some(SharedMutexGuard { mutex: self })),
            libc::EBUSY => Ok(None),
            rc => Err(SyncError::os_code("pthread_mutex_trylock", rc)),
        }
    }

    fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.get()) };
        if rc != 0 {
            tracing::error!(code = rc, "pthread_mutex_unlock failed");
        }
    }

    /// Destroys the mutex. The memory may be reused afterwards.
    pub fn destroy(&self) {
        if self.initialized.swap(0, Ordering::SeqCst) != 0 {
            unsafe { libc::pthread_mutex_destroy(self.mutex.get()) };
        }
    }
}

impl std::fmt::Debug for RawSharedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSharedMutex")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// RAII guard for [`RawSharedMutex`].
#[derive(Debug)]
pub struct SharedMutexGuard<'a> {
    mutex: &'a RawSharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;

    use super::*;

    #[test]
    fn test_lock_unlock_recursive() {
        let mut slot: MaybeUninit<RawSharedMutex> = MaybeUninit::zeroed();
        unsafe { RawSharedMutex::init(slot.as_mut_ptr()).unwrap() };
        let mutex = unsafe { slot.assume_init_ref() };

        let g1 = mutex.lock().unwrap();
        // recursive: the same thread may lock again
        let g2 = mutex.lock().unwrap();
        drop(g2);
        drop(g1);

        assert!(mutex.try_lock().unwrap().is_some());
        mutex.destroy();
    }
}
