//! End-to-end pool behaviour: coalescing, batched delivery, cancellation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use epcore_queue::{EventMessage, ThreadMessage, MSG_USER};
use epcore_thread::{EventThreadHandle, PrivateEventThread, ThreadEventHandler};
use epcore_timerpool::{Rounding, TimerPool, TimerPoolConfig};
use parking_lot::Mutex;

fn block_pool_signals(config: &TimerPoolConfig) {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, config.timer_signal);
        libc::sigaddset(&mut set, config.quit_signal);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

#[derive(Default)]
struct Target {
    received: Vec<u32>,
}

impl ThreadEventHandler for Target {
    fn default_message_handler(&mut self, msg: &EventMessage) {
        self.received.push(msg.message_id());
    }

    fn on_init(&mut self, _thread: &EventThreadHandle) {}
}

#[test]
fn test_coalescing_and_delivery_order() {
    let config = TimerPoolConfig {
        resolution_ms: 50,
        rounding: Rounding::Down,
        ..TimerPoolConfig::default()
    };
    block_pool_signals(&config);
    let pool = TimerPool::init(config).unwrap();

    let thread = PrivateEventThread::init(Target::default(), 64, false).unwrap();
    let handle = thread.handle();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // one message target and two callback targets, per the classic scenario
    pool.register_message(100, &handle, EventMessage::new(MSG_USER + 1))
        .unwrap();
    let o = Arc::clone(&order);
    pool.register_callback(250, move |_id| o.lock().push("cb-250"))
        .unwrap();
    let o = Arc::clone(&order);
    pool.register_callback(412, move |_id| o.lock().push("cb-412"))
        .unwrap();

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.bucket_count(), 3);

    std::thread::sleep(Duration::from_millis(600));

    // all three buckets fired and their timers returned to the free list
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.bucket_count(), 0);
    assert_eq!(pool.free_timer_count(), 3);
    assert_eq!(*order.lock(), vec!["cb-250", "cb-412"]);

    thread.quit().unwrap();
    let target = thread.join().unwrap();
    assert_eq!(target.received, vec![MSG_USER + 1]);

    pool.uninit();
}

#[test]
fn test_same_bucket_shares_one_timer() {
    let config = TimerPoolConfig {
        resolution_ms: 100,
        rounding: Rounding::Down,
        ..TimerPoolConfig::default()
    };
    block_pool_signals(&config);
    let pool = TimerPool::init(config).unwrap();

    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    for _ in 0..5 {
        let f = Arc::clone(&fired);
        pool.register_callback(300, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    // five registrations quantised to the same expiry share one kernel timer
    assert_eq!(pool.len(), 5);
    assert_eq!(pool.bucket_count(), 1);

    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(fired.load(Ordering::SeqCst), 5);
    assert_eq!(pool.free_timer_count(), 1);

    pool.uninit();
}

#[test]
fn test_unregister_before_expiry_suppresses_delivery() {
    let config = TimerPoolConfig {
        resolution_ms: 10,
        rounding: Rounding::Down,
        ..TimerPoolConfig::default()
    };
    block_pool_signals(&config);
    let pool = TimerPool::init(config).unwrap();

    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let id = pool
        .register_callback(100, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    pool.unregister(id);
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.free_timer_count(), 1);

    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // unknown ids are ignored
    pool.unregister(424_242);

    pool.uninit();
}
