#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Infrastructure toolkit for EPC control-plane services (MME, SGW, PGW,
//! SGSN, PFCP nodes) on Linux.
//!
//! This crate ties the member crates together and owns process-wide
//! initialisation: logging, the shared-memory object pool and public queue
//! registrations, real-time signal policy, and the timer pool. Call
//! [`initialize`] once at program start and [`uninitialize`] at shutdown;
//! teardown ordering matters (the timer pool stops before the DNS caches).
//!
//! ```no_run
//! let config = epcore::Config::default();
//! epcore::initialize(&config).expect("epcore init");
//! // ... run the application ...
//! epcore::uninitialize();
//! ```

pub mod config;
pub mod logging;

pub use config::Config;

pub use epcore_dns as dns;
pub use epcore_pfcp_proto as pfcp;
pub use epcore_queue as queue;
pub use epcore_sync as sync;
pub use epcore_thread as thread;
pub use epcore_timerpool as timerpool;

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Failures raised during toolkit initialisation.
#[derive(Debug, Error)]
pub enum EpcError {
    #[error("epcore is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Sync(#[from] epcore_sync::SyncError),

    #[error(transparent)]
    Thread(#[from] epcore_thread::ThreadError),

    #[error(transparent)]
    TimerPool(#[from] epcore_timerpool::TimerPoolError),

    #[error("configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Specialized `Result` type for toolkit operations.
pub type Result<T> = std::result::Result<T, EpcError>;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Blocks the timer-pool signals in the calling thread; threads spawned
/// afterwards inherit the mask, leaving the pool's dispatcher as the only
/// receiver.
fn block_timer_pool_signals(config: &epcore_timerpool::TimerPoolConfig) {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, config.timer_signal);
        libc::sigaddset(&mut set, config.quit_signal);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Initialises the toolkit from the options tree. Must run on the main
/// thread before any other epcore threads are spawned, so the signal mask
/// propagates to every child thread.
pub fn initialize(config: &Config) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(EpcError::AlreadyInitialized);
    }

    logging::init(config.epc_tools.logger.as_ref());

    if config.epc_tools.enable_public_objects {
        epcore_sync::SyncObjects::init(&config.epc_tools.synchronization_objects.to_pool_config())?;
        let pool = epcore_sync::SyncObjects::instance()?;
        for queue in &config.epc_tools.public_queue {
            pool.set_public_queue(&queue.to_def())?;
        }
    }

    let pool_config = config.epc_tools.timer_pool_config();
    block_timer_pool_signals(&pool_config);
    epcore_thread::install_timer_signal_handler()?;
    epcore_timerpool::init(pool_config)?;

    if let Some(dns) = &config.epc_tools.dns {
        dns.apply();
    }

    tracing::info!("epcore initialized");
    Ok(())
}

/// Tears the toolkit down: timer pool first, then the DNS caches, then the
/// shared object pool.
pub fn uninitialize() {
    if !INITIALIZED.swap(false, Ordering::SeqCst) {
        return;
    }

    epcore_timerpool::uninit();
    epcore_dns::Cache::shutdown_all();
    epcore_sync::SyncObjects::uninit();

    tracing::info!("epcore uninitialized");
}
