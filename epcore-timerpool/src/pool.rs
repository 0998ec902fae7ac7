//! Pool internals: quantised buckets, kernel timers, dispatcher thread.

use std::collections::HashMap;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use epcore_queue::ThreadMessage;
use epcore_sync::Event;
use epcore_thread::{EventThreadHandle, Inbox, WorkGroupHandle};
use parking_lot::Mutex;

use crate::error::{Result, TimerPoolError};

/// Direction a requested deadline is rounded to the pool resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Up,
    Down,
}

/// Pool configuration; all fields are fixed once the pool is initialised.
#[derive(Debug, Clone, Copy)]
pub struct TimerPoolConfig {
    /// Bucket resolution in milliseconds.
    pub resolution_ms: i64,
    /// Rounding applied during quantisation.
    pub rounding: Rounding,
    /// Real-time signal carrying bucket expirations to the dispatcher.
    pub timer_signal: i32,
    /// Real-time signal that stops the dispatcher.
    pub quit_signal: i32,
}

impl Default for TimerPoolConfig {
    fn default() -> Self {
        Self {
            resolution_ms: 5,
            rounding: Rounding::Down,
            timer_signal: libc::SIGRTMIN() + 2,
            quit_signal: libc::SIGRTMIN() + 3,
        }
    }
}

fn now_us() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    ts.tv_sec * 1_000_000 + ts.tv_nsec / 1000
}

pub(crate) fn quantize_at(absolute_us: i64, resolution_us: i64, rounding: Rounding) -> i64 {
    (absolute_us / resolution_us + i64::from(rounding == Rounding::Up)) * resolution_us
}

/// Absolute quantised expiry for a duration, in microseconds of
/// `CLOCK_REALTIME`.
pub(crate) fn quantize(duration_ms: i64, resolution_us: i64, rounding: Rounding) -> i64 {
    quantize_at(now_us() + duration_ms * 1000, resolution_us, rounding)
}

/// Heap cell a kernel timer's signal payload points to; records the bucket
/// the timer is currently armed for (0 = parked on the free list).
struct BucketTag {
    expire_us: AtomicI64,
}

struct PoolTimer {
    handle: libc::timer_t,
    tag: Box<BucketTag>,
}

unsafe impl Send for PoolTimer {}

impl PoolTimer {
    fn create(dispatcher_tid: libc::pid_t, signal: i32) -> Result<Self> {
        let tag = Box::new(BucketTag {
            expire_us: AtomicI64::new(0),
        });

        let mut sev: libc::sigevent = unsafe { std::mem::zeroed() };
        sev.sigev_notify = libc::SIGEV_THREAD_ID;
        sev.sigev_signo = signal;
        sev.sigev_notify_thread_id = dispatcher_tid;
        sev.sigev_value = libc::sigval {
            sival_ptr: std::ptr::from_ref::<BucketTag>(tag.as_ref())
                .cast_mut()
                .cast(),
        };

        let mut handle: libc::timer_t = std::ptr::null_mut();
        if unsafe { libc::timer_create(libc::CLOCK_REALTIME, &mut sev, &mut handle) } == -1 {
            return Err(TimerPoolError::CreatingTimer(
                std::io::Error::last_os_error(),
            ));
        }
        Ok(Self { handle, tag })
    }

    /// Arms the timer to fire at the absolute expiry recorded in its tag.
    fn start(&self) -> Result<()> {
        let expire_us = self.tag.expire_us.load(Ordering::SeqCst);
        let its = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: expire_us / 1_000_000,
                tv_nsec: expire_us % 1_000_000 * 1000,
            },
        };
        if unsafe { libc::timer_settime(self.handle, libc::TIMER_ABSTIME, &its, std::ptr::null_mut()) }
            == -1
        {
            return Err(TimerPoolError::TimerSetTimeFailed(
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn stop(&self) {
        let its: libc::itimerspec = unsafe { std::mem::zeroed() };
        unsafe { libc::timer_settime(self.handle, 0, &its, std::ptr::null_mut()) };
    }
}

impl Drop for PoolTimer {
    fn drop(&mut self) {
        unsafe { libc::timer_delete(self.handle) };
    }
}

enum Notification {
    /// Posts a pre-built message to a thread or work group; returns whether
    /// the push succeeded.
    Send(Box<dyn FnOnce() -> bool + Send>),
    /// Invokes a callback with the timer id.
    Callback(Box<dyn FnOnce(u64) + Send>),
}

struct Entry {
    id: u64,
    notify: Notification,
}

struct Bucket {
    timer: PoolTimer,
    entries: HashMap<u64, Entry>,
}

#[derive(Default)]
struct PoolState {
    /// quantised expiry → bucket (one kernel timer each)
    buckets: HashMap<i64, Bucket>,
    /// timer id → quantised expiry of the bucket holding it
    id_index: HashMap<u64, i64>,
    free_timers: Vec<PoolTimer>,
    next_id: u64,
}

/// The shared timer pool. See the crate docs for the model.
pub struct TimerPool {
    config: TimerPoolConfig,
    resolution_us: i64,
    state: Mutex<PoolState>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_tid: AtomicI64,
    dropped: AtomicU64,
}

impl TimerPool {
    /// Starts the dispatcher thread and returns the ready pool.
    pub fn init(config: TimerPoolConfig) -> Result<Arc<Self>> {
        let tid_cell = Arc::new((Event::new().map_err(io_from_sync)?, AtomicI64::new(0)));
        let tid_cell2 = Arc::clone(&tid_cell);
        let timer_signal = config.timer_signal;
        let quit_signal = config.quit_signal;

        let pool = Arc::new(Self {
            config,
            resolution_us: config.resolution_ms * 1000,
            state: Mutex::new(PoolState::default()),
            dispatcher: Mutex::new(None),
            dispatcher_tid: AtomicI64::new(0),
            dropped: AtomicU64::new(0),
        });

        let pool_for_thread = Arc::clone(&pool);
        let join = std::thread::Builder::new()
            .name("epcore-timerpool".into())
            .spawn(move || {
                dispatcher_main(&pool_for_thread, &tid_cell2, timer_signal, quit_signal);
            })
            .map_err(TimerPoolError::DispatcherSpawn)?;

        // wait for the dispatcher to publish its kernel tid
        tid_cell.0.wait(None);
        pool.dispatcher_tid
            .store(tid_cell.1.load(Ordering::SeqCst), Ordering::SeqCst);

        *pool.dispatcher.lock() = Some(join);
        Ok(pool)
    }

    /// The configured resolution in milliseconds.
    pub fn resolution_ms(&self) -> i64 {
        self.config.resolution_ms
    }

    /// The configured rounding.
    pub fn rounding(&self) -> Rounding {
        self.config.rounding
    }

    /// Expirations whose message could not be delivered because the target
    /// queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Registers a timer that posts `msg` to `thread` after `ms`
    /// milliseconds. Returns the registration id.
    pub fn register_message<T, Q>(
        &self,
        ms: i64,
        thread: &EventThreadHandle<T, Q>,
        msg: T,
    ) -> Result<u64>
    where
        T: ThreadMessage,
        Q: Inbox<T>,
    {
        let thread = thread.clone();
        self.register(
            ms,
            Notification::Send(Box::new(move || {
                thread.send_message(msg, false).unwrap_or(false)
            })),
        )
    }

    /// Registers a timer that posts `msg` to a work group after `ms`
    /// milliseconds.
    pub fn register_workgroup_message<T, Q>(
        &self,
        ms: i64,
        group: &WorkGroupHandle<T, Q>,
        msg: T,
    ) -> Result<u64>
    where
        T: ThreadMessage,
        Q: Inbox<T>,
    {
        let group = group.clone();
        self.register(
            ms,
            Notification::Send(Box::new(move || {
                group.send_message(msg, false).unwrap_or(false)
            })),
        )
    }

    /// Registers a timer that invokes `callback(timer_id)` after `ms`
    /// milliseconds. The callback runs on the dispatcher thread with the
    /// pool lock held, so it must not re-enter the pool.
    pub fn register_callback(
        &self,
        ms: i64,
        callback: impl FnOnce(u64) + Send + 'static,
    ) -> Result<u64> {
        self.register(ms, Notification::Callback(Box::new(callback)))
    }

    fn register(&self, ms: i64, notify: Notification) -> Result<u64> {
        let expire_us = quantize(ms, self.resolution_us, self.config.rounding);
        let mut state = self.state.lock();

        let id = loop {
            state.next_id = state.next_id.wrapping_add(1);
            if state.next_id != 0 {
                break state.next_id;
            }
        };

        if let Some(bucket) = state.buckets.get_mut(&expire_us) {
            bucket.entries.insert(id, Entry { id, notify });
        } else {
            let timer = match state.free_timers.pop() {
                Some(timer) => timer,
                None => PoolTimer::create(
                    self.dispatcher_tid.load(Ordering::SeqCst) as libc::pid_t,
                    self.config.timer_signal,
                )?,
            };
            timer.tag.expire_us.store(expire_us, Ordering::SeqCst);
            timer.start()?;

            let mut entries = HashMap::new();
            entries.insert(id, Entry { id, notify });
            state.buckets.insert(expire_us, Bucket { timer, entries });
        }

        state.id_index.insert(id, expire_us);
        Ok(id)
    }

    /// Cancels a registration. Unknown ids (including ids already delivered)
    /// are ignored.
    pub fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        let Some(expire_us) = state.id_index.remove(&id) else {
            return;
        };
        let Some(bucket) = state.buckets.get_mut(&expire_us) else {
            return;
        };
        bucket.entries.remove(&id);
        if bucket.entries.is_empty() {
            let bucket = state.buckets.remove(&expire_us).expect("bucket present");
            bucket.timer.stop();
            bucket.timer.tag.expire_us.store(0, Ordering::SeqCst);
            state.free_timers.push(bucket.timer);
        }
    }

    /// Count of live registrations.
    pub fn len(&self) -> usize {
        self.state.lock().id_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct expiry buckets (kernel timers armed).
    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Number of kernel timers parked on the free list.
    pub fn free_timer_count(&self) -> usize {
        self.state.lock().free_timers.len()
    }

    /// Delivers every entry of the bucket the signalled timer is armed for.
    /// Runs on the dispatcher thread.
    fn fire(&self, tag: &BucketTag) {
        let expire_us = tag.expire_us.load(Ordering::SeqCst);
        if expire_us == 0 {
            return; // cancelled between signal and dispatch
        }

        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get(&expire_us) else {
            return;
        };
        // a stale signal for a timer that was recycled onto another bucket
        if !std::ptr::eq(bucket.timer.tag.as_ref(), tag) {
            return;
        }

        let mut bucket = state.buckets.remove(&expire_us).expect("bucket present");
        for (_, entry) in bucket.entries.drain() {
            state.id_index.remove(&entry.id);
            match entry.notify {
                Notification::Send(send) => {
                    if !send() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(id = entry.id, "timer message dropped, queue full");
                    }
                }
                Notification::Callback(cb) => cb(entry.id),
            }
        }

        bucket.timer.tag.expire_us.store(0, Ordering::SeqCst);
        state.free_timers.push(bucket.timer);
    }

    /// Cancels all registrations, stops the dispatcher and releases the
    /// kernel timers.
    pub fn uninit(&self) {
        let ids: Vec<u64> = self.state.lock().id_index.keys().copied().collect();
        for id in ids {
            self.unregister(id);
        }

        let join = self.dispatcher.lock().take();
        if let Some(join) = join {
            unsafe { libc::pthread_kill(join.as_pthread_t(), self.config.quit_signal) };
            let _ = join.join();
        }

        // kernel timers are deleted only after the dispatcher is gone
        self.state.lock().free_timers.clear();
    }
}

impl std::fmt::Debug for TimerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerPool")
            .field("resolution_ms", &self.config.resolution_ms)
            .field("registrations", &state.id_index.len())
            .field("buckets", &state.buckets.len())
            .field("free_timers", &state.free_timers.len())
            .finish()
    }
}

fn io_from_sync(e: epcore_sync::SyncError) -> TimerPoolError {
    TimerPoolError::DispatcherSpawn(std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn dispatcher_main(
    pool: &Arc<TimerPool>,
    tid_cell: &Arc<(Event, AtomicI64)>,
    timer_signal: i32,
    quit_signal: i32,
) {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, timer_signal);
        libc::sigaddset(&mut set, quit_signal);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());

        tid_cell
            .1
            .store(i64::from(libc::gettid()), Ordering::SeqCst);
        tid_cell.0.set();

        loop {
            let mut info: libc::siginfo_t = std::mem::zeroed();
            let sig = libc::sigwaitinfo(&set, &mut info);
            if sig == timer_signal {
                let tag = info.si_value().sival_ptr.cast::<BucketTag>();
                if !tag.is_null() {
                    pool.fire(&*tag);
                }
            } else if sig == quit_signal {
                break;
            } else if sig == -1
                && std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR)
            {
                tracing::error!("sigwaitinfo failed, stopping timer pool dispatcher");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_rounds_to_resolution() {
        let res = 50_000; // 50 ms in us
        let absolute = 1_234_567_891;
        let up = quantize_at(absolute, res, Rounding::Up);
        let down = quantize_at(absolute, res, Rounding::Down);
        assert_eq!(up % res, 0);
        assert_eq!(down % res, 0);
        assert_eq!(up, down + res);
        assert!(down <= absolute && absolute < up);
    }

    #[test]
    fn test_zero_duration_round_up_lands_in_the_future() {
        let up = quantize(0, 50_000, Rounding::Up);
        assert!(up > now_us());
    }
}
