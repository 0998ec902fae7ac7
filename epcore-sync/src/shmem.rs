//! Named, refcounted shared-memory regions.
//!
//! A region is identified by `(name, id)`; the first attacher creates and
//! sizes it, later attachers map the same object. A control header ahead of
//! the payload carries a usage count behind a process-shared mutex; the last
//! detacher destroys the header primitives and unlinks the object.

use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::error::{Result, SyncError};
use crate::mutex::RawSharedMutex;

#[repr(C)]
struct RegionControl {
    ready: AtomicU32,
    usage_count: AtomicI32,
    data_size: u64,
    mutex: RawSharedMutex,
}

/// A mapped shared-memory region with a refcounted control header.
pub struct SharedMemory {
    name: CString,
    map: NonNull<u8>,
    total_size: usize,
    data_size: usize,
    created: bool,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Creates or attaches the region named by `(name, id)` with `size`
    /// payload bytes.
    pub fn init(name: &str, id: char, size: usize) -> Result<Self> {
        let shm_name = format!("/epcore-{}-{id}", name.replace('/', "_"));
        let shm_name = CString::new(shm_name).map_err(|_| SyncError::os("shm name"))?;
        let total_size = std::mem::size_of::<RegionControl>() + size;

        let (fd, created) = Self::open(&shm_name)?;

        if created && unsafe { libc::ftruncate(fd, total_size as libc::off_t) } == -1 {
            let err = SyncError::os("ftruncate");
            unsafe {
                libc::close(fd);
                libc::shm_unlink(shm_name.as_ptr());
            }
            return Err(err);
        }

        if !created {
            if let Err(e) = Self::wait_for_size(fd, total_size, name) {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        }

        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if map == libc::MAP_FAILED {
            return Err(SyncError::os("mmap"));
        }
        let map = NonNull::new(map.cast::<u8>()).ok_or_else(|| SyncError::os("mmap"))?;

        let region = Self {
            name: shm_name,
            map,
            total_size,
            data_size: size,
            created,
        };

        if created {
            let ctrl_ptr = region.map.as_ptr().cast::<RegionControl>();
            unsafe {
                RawSharedMutex::init(std::ptr::addr_of_mut!((*ctrl_ptr).mutex))?;
                std::ptr::addr_of_mut!((*ctrl_ptr).data_size).write(size as u64);
            }
            let ctrl = region.control();
            ctrl.usage_count.store(1, Ordering::SeqCst);
            ctrl.ready.store(1, Ordering::SeqCst);
        } else {
            let ctrl = region.control();
            // wait for the creator to finish initialising the header
            while ctrl.ready.load(Ordering::SeqCst) == 0 {
                std::thread::yield_now();
            }
            debug_assert_eq!(ctrl.data_size, size as u64);
            let _guard = ctrl.mutex.lock()?;
            ctrl.usage_count.fetch_add(1, Ordering::SeqCst);
        }

        Ok(region)
    }

    fn open(name: &CString) -> Result<(i32, bool)> {
        loop {
            let fd = unsafe {
                libc::shm_open(
                    name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                    0o666,
                )
            };
            if fd != -1 {
                return Ok((fd, true));
            }
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::EEXIST) {
                return Err(SyncError::os("shm_open"));
            }
            let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o666) };
            if fd != -1 {
                return Ok((fd, false));
            }
            // the creator may have unlinked between our two attempts
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::ENOENT) {
                return Err(SyncError::os("shm_open"));
            }
        }
    }

    fn wait_for_size(fd: i32, total_size: usize, name: &str) -> Result<()> {
        loop {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } == -1 {
                return Err(SyncError::os("fstat"));
            }
            let existing = st.st_size as usize;
            if existing == total_size {
                return Ok(());
            }
            if existing != 0 {
                let header = std::mem::size_of::<RegionControl>();
                return Err(SyncError::RegionSizeMismatch {
                    name: name.to_owned(),
                    existing: existing.saturating_sub(header),
                    wanted: total_size - header,
                });
            }
            // the creator has opened but not yet sized the object
            std::thread::yield_now();
        }
    }

    fn control(&self) -> &RegionControl {
        unsafe { &*self.map.as_ptr().cast::<RegionControl>() }
    }

    /// Pointer to the first payload byte (past the control header).
    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { self.map.as_ptr().add(std::mem::size_of::<RegionControl>()) }
    }

    /// Payload size in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Whether this handle created the region (and is responsible for
    /// initialising the payload).
    pub fn is_creator(&self) -> bool {
        self.created
    }

    /// Number of attached participants.
    pub fn usage_count(&self) -> i32 {
        self.control().usage_count.load(Ordering::SeqCst)
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        let ctrl = self.control();
        let last = {
            match ctrl.mutex.lock() {
                Ok(_guard) => ctrl.usage_count.fetch_sub(1, Ordering::SeqCst) == 1,
                Err(_) => false,
            }
        };
        if last {
            ctrl.mutex.destroy();
            unsafe { libc::shm_unlink(self.name.as_ptr()) };
        }
        unsafe { libc::munmap(self.map.as_ptr().cast(), self.total_size) };
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("data_size", &self.data_size)
            .field("usage_count", &self.usage_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_attach_detach() {
        let a = SharedMemory::init("epcore-shmem-test", 'A', 256).unwrap();
        assert!(a.is_creator());
        assert_eq!(a.usage_count(), 1);
        assert_eq!(a.data_size(), 256);

        let b = SharedMemory::init("epcore-shmem-test", 'A', 256).unwrap();
        assert!(!b.is_creator());
        assert_eq!(a.usage_count(), 2);

        unsafe { a.data_ptr().write(0xAB) };
        assert_eq!(unsafe { b.data_ptr().read() }, 0xAB);

        drop(b);
        assert_eq!(a.usage_count(), 1);
    }

    #[test]
    fn test_size_mismatch() {
        let _a = SharedMemory::init("epcore-shmem-size", 'A', 128).unwrap();
        let err = SharedMemory::init("epcore-shmem-size", 'A', 4096).unwrap_err();
        assert!(matches!(err, SyncError::RegionSizeMismatch { .. }));
    }
}
