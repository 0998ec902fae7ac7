//! Per-thread timers.
//!
//! Each [`EventTimer`] owns one kernel timer created with
//! `SIGEV_SIGNAL`/`SIGRTMIN`; the signal value carries a pointer to the
//! timer's binding, and a process-wide handler (installed once, at program
//! startup) posts the pre-built TIMER message into the owning thread's inbox.
//! The post never blocks: an expiration that finds the inbox full is dropped
//! and counted, not retried.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, ThreadError};

/// The signal used by per-thread timers.
pub fn timer_signal() -> i32 {
    libc::SIGRTMIN()
}

pub(crate) struct TimerBinding {
    pub(crate) post: Box<dyn Fn() -> bool + Send + Sync>,
    pub(crate) dropped: AtomicU64,
}

extern "C" fn timer_signal_handler(
    _signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    let binding = unsafe { (*info).si_value().sival_ptr }.cast::<TimerBinding>();
    if !binding.is_null() {
        let binding = unsafe { &*binding };
        if !(binding.post)() {
            binding.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the process-wide timer signal handler. Must run once before any
/// [`EventTimer`] is started; failure is fatal for the timer subsystem.
pub fn install_timer_signal_handler() -> Result<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_flags = libc::SA_SIGINFO;
        sa.sa_sigaction = timer_signal_handler as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(timer_signal(), &sa, std::ptr::null_mut()) == -1 {
            HANDLER_INSTALLED.store(false, Ordering::SeqCst);
            return Err(ThreadError::TimerHandlerRegistration(
                std::io::Error::last_os_error(),
            ));
        }
    }
    Ok(())
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Kernel timer handle. `timer_t` is a raw pointer on glibc, but the handle
/// is process-global and only used through `timer_settime`/`timer_delete`.
#[derive(Clone, Copy)]
struct TimerHandle(libc::timer_t);

unsafe impl Send for TimerHandle {}
unsafe impl Sync for TimerHandle {}

/// A timer owned by an event thread (or work group).
///
/// Bind it with `init_timer` on the owner's handle, then [`EventTimer::start`].
/// When it fires, the owner dispatches a TIMER message whose payload is this
/// timer's [`EventTimer::id`]. The owner must outlive its timers; drop stops
/// and deletes the kernel timer first.
pub struct EventTimer {
    id: u64,
    interval_ms: i64,
    one_shot: bool,
    os_timer: Option<TimerHandle>,
    binding: Option<Arc<TimerBinding>>,
}

impl EventTimer {
    pub fn new() -> Self {
        Self {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            interval_ms: 0,
            one_shot: true,
            os_timer: None,
            binding: None,
        }
    }

    /// Creates a timer with an interval and mode in one go.
    pub fn with_interval(interval_ms: i64, one_shot: bool) -> Self {
        let mut timer = Self::new();
        timer.interval_ms = interval_ms;
        timer.one_shot = one_shot;
        timer
    }

    /// The process-unique timer id, delivered as the TIMER message payload.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub fn set_interval_ms(&mut self, interval_ms: i64) {
        self.interval_ms = interval_ms;
    }

    pub fn set_one_shot(&mut self, one_shot: bool) {
        self.one_shot = one_shot;
    }

    pub fn is_initialized(&self) -> bool {
        self.os_timer.is_some()
    }

    /// Expirations dropped because the owner's inbox was full.
    pub fn dropped(&self) -> u64 {
        self.binding
            .as_ref()
            .map_or(0, |b| b.dropped.load(Ordering::Relaxed))
    }

    /// Creates the kernel timer bound to `post` (which enqueues the
    /// pre-built TIMER message without blocking).
    pub(crate) fn bind(&mut self, post: Box<dyn Fn() -> bool + Send + Sync>) -> Result<()> {
        if self.os_timer.is_some() {
            return Err(ThreadError::AlreadyInitialized);
        }

        let binding = Arc::new(TimerBinding {
            post,
            dropped: AtomicU64::new(0),
        });

        let mut sev: libc::sigevent = unsafe { std::mem::zeroed() };
        sev.sigev_notify = libc::SIGEV_SIGNAL;
        sev.sigev_signo = timer_signal();
        sev.sigev_value = libc::sigval {
            sival_ptr: Arc::as_ptr(&binding).cast_mut().cast(),
        };

        let mut handle: libc::timer_t = std::ptr::null_mut();
        if unsafe { libc::timer_create(libc::CLOCK_REALTIME, &mut sev, &mut handle) } == -1 {
            return Err(ThreadError::TimerUnableToInitialize(
                std::io::Error::last_os_error(),
            ));
        }

        self.os_timer = Some(TimerHandle(handle));
        self.binding = Some(binding);
        Ok(())
    }

    /// Arms the timer: one-shot or periodic depending on configuration.
    pub fn start(&self) -> Result<()> {
        let Some(TimerHandle(handle)) = self.os_timer else {
            return Err(ThreadError::TimerNotInitialized);
        };

        let value = libc::timespec {
            tv_sec: self.interval_ms / 1000,
            tv_nsec: (self.interval_ms % 1000) * 1_000_000,
        };
        let its = libc::itimerspec {
            it_value: value,
            it_interval: if self.one_shot {
                libc::timespec {
                    tv_sec: 0,
                    tv_nsec: 0,
                }
            } else {
                value
            },
        };

        if unsafe { libc::timer_settime(handle, 0, &its, std::ptr::null_mut()) } == -1 {
            return Err(ThreadError::TimerUnableToStart(
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    /// Disarms the timer. A concurrent expiration may still deliver one
    /// final message.
    pub fn stop(&self) {
        if let Some(TimerHandle(handle)) = self.os_timer {
            let its: libc::itimerspec = unsafe { std::mem::zeroed() };
            unsafe { libc::timer_settime(handle, 0, &its, std::ptr::null_mut()) };
        }
    }
}

impl Default for EventTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventTimer {
    fn drop(&mut self) {
        self.stop();
        if let Some(TimerHandle(handle)) = self.os_timer.take() {
            unsafe { libc::timer_delete(handle) };
        }
        self.binding = None;
    }
}

impl std::fmt::Debug for EventTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTimer")
            .field("id", &self.id)
            .field("interval_ms", &self.interval_ms)
            .field("one_shot", &self.one_shot)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
