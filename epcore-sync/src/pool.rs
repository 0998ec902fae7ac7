//! Process-wide pool of shared synchronisation objects.
//!
//! Public queues cannot embed pthread/semaphore state directly in their own
//! regions for every participant, so a single well-known shared-memory region
//! holds arrays of semaphore and mutex slots. Objects are addressed by a
//! 1-based slot index that is small enough to store in any control header;
//! index 0 means "not allocated". Each array has its own freelist behind its
//! own allocator mutex, with high-water marks kept for diagnostics.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SyncError};
use crate::mutex::RawSharedMutex;
use crate::semaphore::RawSemaphore;
use crate::shmem::SharedMemory;

/// Maximum number of public queue definitions the pool can record.
pub const MAX_PUBLIC_QUEUES: usize = 32;

const POOL_REGION_NAME: &str = "synchobjects";

/// Pool sizing, from the `/EpcTools/SynchronizationObjects` options.
#[derive(Debug, Clone, Copy)]
pub struct SyncObjectsConfig {
    pub number_semaphores: usize,
    pub number_mutexes: usize,
}

impl Default for SyncObjectsConfig {
    fn default() -> Self {
        Self {
            number_semaphores: 64,
            number_mutexes: 64,
        }
    }
}

/// A public queue registration, shared with every participating process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicQueueDef {
    pub queue_id: i32,
    pub msg_size: i32,
    pub msg_cnt: i32,
    pub multiple_readers: bool,
    pub multiple_writers: bool,
}

#[repr(C)]
struct AllocatorControl {
    lock: RawSharedMutex,
    max: i32,
    head: i32,
    current_used: AtomicI64,
    max_used: AtomicI64,
}

#[repr(C)]
struct QueueDefSlot {
    used: u8,
    multiple_readers: u8,
    multiple_writers: u8,
    queue_id: i32,
    msg_size: i32,
    msg_cnt: i32,
}

#[repr(C)]
struct PoolHeader {
    sem_ctrl: AllocatorControl,
    mutex_ctrl: AllocatorControl,
    queue_defs: [QueueDefSlot; MAX_PUBLIC_QUEUES],
}

#[repr(C)]
struct SemaphoreSlot {
    next_index: i32,
    sem: RawSemaphore,
}

#[repr(C)]
struct MutexSlot {
    next_index: i32,
    mutex: RawSharedMutex,
}

fn align16(n: usize) -> usize {
    (n + 15) & !15
}

/// The process-wide shared object pool.
///
/// Initialised once per process via [`SyncObjects::init`]; the region is torn
/// down when the last process detaches. There is no crash compaction: if a
/// process dies while holding slots, the operator removes the `/dev/shm`
/// objects before a cold start.
pub struct SyncObjects {
    region: SharedMemory,
    sem_count: usize,
    mutex_count: usize,
    sem_offset: usize,
    mutex_offset: usize,
}

unsafe impl Send for SyncObjects {}
unsafe impl Sync for SyncObjects {}

static INSTANCE: Mutex<Option<Arc<SyncObjects>>> = Mutex::new(None);

impl SyncObjects {
    /// Creates or attaches the pool region. All processes sharing public
    /// objects must pass identical sizing.
    pub fn init(config: &SyncObjectsConfig) -> Result<()> {
        let mut instance = INSTANCE.lock();
        if instance.is_some() {
            return Err(SyncError::AlreadyInitialized);
        }

        let sem_offset = align16(std::mem::size_of::<PoolHeader>());
        let mutex_offset = align16(
            sem_offset + (config.number_semaphores + 1) * std::mem::size_of::<SemaphoreSlot>(),
        );
        let total = mutex_offset + (config.number_mutexes + 1) * std::mem::size_of::<MutexSlot>();

        let region = SharedMemory::init(POOL_REGION_NAME, 'A', total)?;
        let pool = Self {
            region,
            sem_count: config.number_semaphores,
            mutex_count: config.number_mutexes,
            sem_offset,
            mutex_offset,
        };

        if pool.region.is_creator() {
            unsafe {
                pool.init_allocator(
                    std::ptr::addr_of_mut!((*pool.header()).sem_ctrl),
                    config.number_semaphores,
                )?;
                pool.init_allocator(
                    std::ptr::addr_of_mut!((*pool.header()).mutex_ctrl),
                    config.number_mutexes,
                )?;
                for i in 1..=config.number_semaphores {
                    let slot = pool.sem_slot_ptr(i as i32);
                    (*slot).next_index = if i == config.number_semaphores {
                        0
                    } else {
                        (i + 1) as i32
                    };
                }
                for i in 1..=config.number_mutexes {
                    let slot = pool.mutex_slot_ptr(i as i32);
                    (*slot).next_index = if i == config.number_mutexes {
                        0
                    } else {
                        (i + 1) as i32
                    };
                }
            }
        }

        tracing::debug!(
            semaphores = config.number_semaphores,
            mutexes = config.number_mutexes,
            creator = pool.region.is_creator(),
            "shared object pool initialized"
        );

        *instance = Some(Arc::new(pool));
        Ok(())
    }

    /// Tears the pool down for this process. Outstanding handles into the
    /// pool must be dropped first.
    pub fn uninit() {
        let mut instance = INSTANCE.lock();
        if let Some(pool) = instance.take() {
            pool.log_object_usage();
        }
    }

    /// Retrieves the pool, failing when public objects were not enabled.
    pub fn instance() -> Result<Arc<Self>> {
        INSTANCE
            .lock()
            .clone()
            .ok_or(SyncError::PublicObjectsNotEnabled)
    }

    unsafe fn init_allocator(&self, ctrl: *mut AllocatorControl, count: usize) -> Result<()> {
        RawSharedMutex::init(std::ptr::addr_of_mut!((*ctrl).lock))?;
        (*ctrl).max = count as i32;
        (*ctrl).head = if count == 0 { 0 } else { 1 };
        (*ctrl).current_used.store(0, Ordering::SeqCst);
        (*ctrl).max_used.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn header(&self) -> *mut PoolHeader {
        self.region.data_ptr().cast()
    }

    fn sem_slot_ptr(&self, index: i32) -> *mut SemaphoreSlot {
        unsafe {
            self.region
                .data_ptr()
                .add(self.sem_offset)
                .cast::<SemaphoreSlot>()
                .add(index as usize)
        }
    }

    fn mutex_slot_ptr(&self, index: i32) -> *mut MutexSlot {
        unsafe {
            self.region
                .data_ptr()
                .add(self.mutex_offset)
                .cast::<MutexSlot>()
                .add(index as usize)
        }
    }

    unsafe fn alloc_slot(
        &self,
        ctrl: *mut AllocatorControl,
        next_of: impl Fn(i32) -> i32,
        kind: &'static str,
    ) -> Result<i32> {
        let lock = &*std::ptr::addr_of!((*ctrl).lock);
        let _guard = lock.lock()?;
        let head = (*ctrl).head;
        if head == 0 {
            return Err(SyncError::NoFreeSlots(kind));
        }
        (*ctrl).head = next_of(head);
        let used = (*std::ptr::addr_of!((*ctrl).current_used)).fetch_add(1, Ordering::SeqCst) + 1;
        (*std::ptr::addr_of!((*ctrl).max_used)).fetch_max(used, Ordering::SeqCst);
        Ok(head)
    }

    unsafe fn free_slot(
        &self,
        ctrl: *mut AllocatorControl,
        index: i32,
        set_next: impl Fn(i32, i32),
    ) -> Result<()> {
        if index < 1 || index > (*ctrl).max {
            return Err(SyncError::InvalidOffset(index));
        }
        let lock = &*std::ptr::addr_of!((*ctrl).lock);
        let _guard = lock.lock()?;
        set_next(index, (*ctrl).head);
        (*ctrl).head = index;
        (*std::ptr::addr_of!((*ctrl).current_used)).fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Allocates a semaphore slot, returning its 1-based index.
    pub fn alloc_semaphore(&self) -> Result<i32> {
        unsafe {
            self.alloc_slot(
                std::ptr::addr_of_mut!((*self.header()).sem_ctrl),
                |i| (*self.sem_slot_ptr(i)).next_index,
                "semaphore",
            )
        }
    }

    /// Returns a semaphore slot to the freelist.
    pub fn free_semaphore(&self, index: i32) -> Result<()> {
        unsafe {
            self.free_slot(
                std::ptr::addr_of_mut!((*self.header()).sem_ctrl),
                index,
                |i, next| (*self.sem_slot_ptr(i)).next_index = next,
            )
        }
    }

    /// Allocates a mutex slot, returning its 1-based index.
    pub fn alloc_mutex(&self) -> Result<i32> {
        unsafe {
            self.alloc_slot(
                std::ptr::addr_of_mut!((*self.header()).mutex_ctrl),
                |i| (*self.mutex_slot_ptr(i)).next_index,
                "mutex",
            )
        }
    }

    /// Returns a mutex slot to the freelist.
    pub fn free_mutex(&self, index: i32) -> Result<()> {
        unsafe {
            self.free_slot(
                std::ptr::addr_of_mut!((*self.header()).mutex_ctrl),
                index,
                |i, next| (*self.mutex_slot_ptr(i)).next_index = next,
            )
        }
    }

    /// Resolves a semaphore slot index to its in-region state.
    pub fn semaphore_slot(&self, index: i32) -> Result<NonNull<RawSemaphore>> {
        if index < 1 || index as usize > self.sem_count {
            return Err(SyncError::InvalidOffset(index));
        }
        NonNull::new(unsafe { std::ptr::addr_of_mut!((*self.sem_slot_ptr(index)).sem) })
            .ok_or(SyncError::InvalidOffset(index))
    }

    /// Resolves a mutex slot index to its in-region state.
    pub fn mutex_slot(&self, index: i32) -> Result<NonNull<RawSharedMutex>> {
        if index < 1 || index as usize > self.mutex_count {
            return Err(SyncError::InvalidOffset(index));
        }
        NonNull::new(unsafe { std::ptr::addr_of_mut!((*self.mutex_slot_ptr(index)).mutex) })
            .ok_or(SyncError::InvalidOffset(index))
    }

    /// Records a public queue definition so late-starting processes can find
    /// it by queue id.
    pub fn set_public_queue(&self, def: &PublicQueueDef) -> Result<()> {
        let header = self.header();
        for i in 0..MAX_PUBLIC_QUEUES {
            let slot = unsafe { &mut (*header).queue_defs[i] };
            if slot.used != 0 && slot.queue_id == def.queue_id {
                return Ok(());
            }
            if slot.used == 0 {
                slot.queue_id = def.queue_id;
                slot.msg_size = def.msg_size;
                slot.msg_cnt = def.msg_cnt;
                slot.multiple_readers = u8::from(def.multiple_readers);
                slot.multiple_writers = u8::from(def.multiple_writers);
                slot.used = 1;
                return Ok(());
            }
        }
        Err(SyncError::NoFreeSlots("public queue definition"))
    }

    /// Looks up a public queue definition by queue id.
    pub fn public_queue(&self, queue_id: i32) -> Option<PublicQueueDef> {
        let header = self.header();
        for i in 0..MAX_PUBLIC_QUEUES {
            let slot = unsafe { &(*header).queue_defs[i] };
            if slot.used != 0 && slot.queue_id == queue_id {
                return Some(PublicQueueDef {
                    queue_id: slot.queue_id,
                    msg_size: slot.msg_size,
                    msg_cnt: slot.msg_cnt,
                    multiple_readers: slot.multiple_readers != 0,
                    multiple_writers: slot.multiple_writers != 0,
                });
            }
        }
        None
    }

    /// Logs allocator usage (current and high-water) for both slot arrays.
    pub fn log_object_usage(&self) {
        let header = self.header();
        let (sem_ctrl, mutex_ctrl) = unsafe { (&(*header).sem_ctrl, &(*header).mutex_ctrl) };
        tracing::info!(
            semaphores_used = sem_ctrl.current_used.load(Ordering::SeqCst),
            semaphores_max_used = sem_ctrl.max_used.load(Ordering::SeqCst),
            mutexes_used = mutex_ctrl.current_used.load(Ordering::SeqCst),
            mutexes_max_used = mutex_ctrl.max_used.load(Ordering::SeqCst),
            "shared object pool usage"
        );
    }
}

impl std::fmt::Debug for SyncObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncObjects")
            .field("sem_count", &self.sem_count)
            .field("mutex_count", &self.mutex_count)
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The pool is a process-wide singleton, so the full alloc/free cycle is
    // exercised in one test body.
    #[test]
    fn test_pool_lifecycle() {
        SyncObjects::init(&SyncObjectsConfig {
            number_semaphores: 4,
            number_mutexes: 2,
        })
        .unwrap();
        let pool = SyncObjects::instance().unwrap();

        let s1 = pool.alloc_semaphore().unwrap();
        let s2 = pool.alloc_semaphore().unwrap();
        assert_ne!(s1, s2);

        let m1 = pool.alloc_mutex().unwrap();
        let m2 = pool.alloc_mutex().unwrap();
        assert!(matches!(
            pool.alloc_mutex(),
            Err(SyncError::NoFreeSlots("mutex"))
        ));
        pool.free_mutex(m1).unwrap();
        let m3 = pool.alloc_mutex().unwrap();
        assert_eq!(m3, m1);
        pool.free_mutex(m2).unwrap();
        pool.free_mutex(m3).unwrap();

        pool.free_semaphore(s1).unwrap();
        pool.free_semaphore(s2).unwrap();

        let def = PublicQueueDef {
            queue_id: 42,
            msg_size: 24,
            msg_cnt: 16,
            multiple_readers: false,
            multiple_writers: true,
        };
        pool.set_public_queue(&def).unwrap();
        assert_eq!(pool.public_queue(42), Some(def));
        assert_eq!(pool.public_queue(43), None);

        assert!(matches!(
            pool.semaphore_slot(0),
            Err(SyncError::InvalidOffset(0))
        ));

        drop(pool);
        SyncObjects::uninit();
        assert!(matches!(
            SyncObjects::instance(),
            Err(SyncError::PublicObjectsNotEnabled)
        ));
    }
}
