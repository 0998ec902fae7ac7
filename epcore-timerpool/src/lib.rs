#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! A pool that multiplexes many logical deadlines onto few kernel timers.
//!
//! Subsystems here want thousands of short, coarse timers (query TTLs,
//! session guards, keepalives); one `timer_create` per logical timer does not
//! scale. The pool quantises each requested deadline to a configurable
//! resolution and groups registrations by quantised expiry: every distinct
//! expiry bucket holds exactly one kernel timer, and all entries in a bucket
//! are delivered in one batch when it fires.
//!
//! A dedicated dispatcher thread blocks in `sigwaitinfo` on the pool's
//! real-time signals; hosts must keep those signals blocked in every other
//! thread.

mod error;
mod pool;

pub use error::{Result, TimerPoolError};
pub use pool::{Rounding, TimerPool, TimerPoolConfig};

use std::sync::Arc;

use parking_lot::Mutex;

static INSTANCE: Mutex<Option<Arc<TimerPool>>> = Mutex::new(None);

/// Initialises the process-wide pool instance.
pub fn init(config: TimerPoolConfig) -> Result<Arc<TimerPool>> {
    let mut instance = INSTANCE.lock();
    if instance.is_some() {
        return Err(TimerPoolError::AlreadyInitialized);
    }
    let pool = TimerPool::init(config)?;
    *instance = Some(Arc::clone(&pool));
    Ok(pool)
}

/// The process-wide pool instance.
pub fn instance() -> Result<Arc<TimerPool>> {
    INSTANCE
        .lock()
        .clone()
        .ok_or(TimerPoolError::NotInitialized)
}

/// Cancels all registrations, stops the dispatcher and drops the process
/// instance.
pub fn uninit() {
    let pool = INSTANCE.lock().take();
    if let Some(pool) = pool {
        pool.uninit();
    }
}
