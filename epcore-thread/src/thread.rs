//! The event thread: an OS thread dispatching messages from its inbox.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use epcore_queue::{
    EventMessage, MessageData, PrivateQueue, PublicQueue, QueueMode, ThreadMessage, MSG_INIT,
    MSG_QUIT, MSG_SUSPEND, MSG_TIMER, MSG_USER,
};
use epcore_sync::Semaphore;

use crate::dispatch::MessageMapChain;
use crate::error::{Result, ThreadError};
use crate::inbox::Inbox;
use crate::timer::EventTimer;

/// Lifecycle state of an event thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    WaitingToRun,
    Running,
    DoneRunning,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::DoneRunning,
            _ => Self::WaitingToRun,
        }
    }
}

/// Callbacks and message bindings for an [`EventThread`].
///
/// The handler runs entirely inside the owning thread: no two callbacks ever
/// execute concurrently for the same thread.
pub trait ThreadEventHandler<T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>>:
    Send + 'static
where
    Self: Sized,
{
    /// The user-message bindings, most-derived table first.
    fn message_map() -> MessageMapChain<Self, T> {
        MessageMapChain::new()
    }

    /// Runs in the thread before the first message is dispatched.
    fn on_init(&mut self, _thread: &EventThreadHandle<T, Q>) {}

    /// Runs when QUIT is dispatched, just before the thread exits.
    fn on_quit(&mut self) {}

    /// Runs when SUSPEND is dispatched, before the thread blocks.
    fn on_suspend(&mut self) {}

    /// Runs when a TIMER message is dispatched; `timer_id` identifies the
    /// [`EventTimer`] that fired.
    fn on_timer(&mut self, _timer_id: u64) {}

    /// Called for user messages with no binding in the map chain.
    fn default_message_handler(&mut self, _msg: &T) {}
}

struct ThreadShared {
    run_state: AtomicU8,
    suspend_count: AtomicI32,
    suspend_sem: Semaphore,
}

/// A cloneable write-side handle to an event thread: send messages, suspend,
/// resume, quit, bind timers.
pub struct EventThreadHandle<T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>> {
    queue: Arc<Q>,
    shared: Arc<ThreadShared>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: ThreadMessage, Q: Inbox<T>> Clone for EventThreadHandle<T, Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            shared: Arc::clone(&self.shared),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ThreadMessage, Q: Inbox<T>> EventThreadHandle<T, Q> {
    /// Sends a message, optionally waiting for queue space.
    pub fn send_message(&self, msg: T, wait: bool) -> Result<bool> {
        Ok(self.queue.push(msg, wait)?)
    }

    /// Sends a bare message id with an empty payload.
    pub fn send_id(&self, id: u32) -> Result<bool> {
        self.send_message(T::from_parts(id, MessageData::default()), true)
    }

    /// Posts the QUIT message; pending messages are dispatched first.
    pub fn quit(&self) -> Result<()> {
        self.send_id(MSG_QUIT).map(|_| ())
    }

    /// Suspends the thread. Overlapping suspends coalesce: only the 0→1
    /// transition posts the SUSPEND message.
    pub fn suspend(&self) -> Result<()> {
        if self.shared.suspend_count.fetch_add(1, Ordering::SeqCst) == 0 {
            self.send_id(MSG_SUSPEND)?;
        }
        Ok(())
    }

    /// Resumes a suspended thread once the suspend count drops to zero.
    pub fn resume(&self) -> Result<()> {
        if self.shared.suspend_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.suspend_sem.increment()?;
        }
        Ok(())
    }

    /// The thread's current run state.
    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.shared.run_state.load(Ordering::SeqCst))
    }

    /// Binds `timer` to this thread: when it fires, a TIMER message carrying
    /// the timer id is pushed (without blocking) into this inbox.
    pub fn init_timer(&self, timer: &mut EventTimer) -> Result<()> {
        let queue = Arc::clone(&self.queue);
        let msg = T::from_parts(MSG_TIMER, MessageData::from_u64(timer.id()));
        timer.bind(Box::new(move || queue.push(msg, false).unwrap_or(false)))
    }
}

impl<T: ThreadMessage, Q: Inbox<T>> std::fmt::Debug for EventThreadHandle<T, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventThreadHandle")
            .field("run_state", &self.run_state())
            .finish_non_exhaustive()
    }
}

/// An OS thread bound to an inbox queue and a message-dispatching handler.
pub struct EventThread<H, T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>>
where
    H: ThreadEventHandler<T, Q>,
{
    handle: EventThreadHandle<T, Q>,
    join: Option<JoinHandle<H>>,
    pending: Option<(H, Q)>,
}

/// An event thread over a heap-backed inbox.
pub type PrivateEventThread<H> = EventThread<H, EventMessage, PrivateQueue<EventMessage>>;
/// An event thread over a shared-memory inbox, reachable from other
/// processes by queue id.
pub type PublicEventThread<H> = EventThread<H, EventMessage, PublicQueue>;

/// Queue id for a thread inbox, per the application/thread numbering scheme.
pub fn thread_queue_id(app_id: i16, thread_id: u16) -> i32 {
    i32::from(app_id) * 100_000 + 10_000 + i32::from(thread_id)
}

/// Queue id for a work-group inbox.
pub fn workgroup_queue_id(app_id: i16, group_id: u16) -> i32 {
    i32::from(app_id) * 100_000 + 20_000 + i32::from(group_id)
}

impl<H> PrivateEventThread<H>
where
    H: ThreadEventHandler<EventMessage, PrivateQueue<EventMessage>>,
{
    /// Creates the thread with a private inbox of `queue_size` slots and
    /// starts it unless `suspended`.
    pub fn init(handler: H, queue_size: usize, suspended: bool) -> Result<Self> {
        let reader = PrivateQueue::new(queue_size, true, false, QueueMode::ReadOnly)?;
        Self::build(handler, reader, suspended)
    }
}

impl<H> PublicEventThread<H>
where
    H: ThreadEventHandler<EventMessage, PublicQueue>,
{
    /// Creates the thread on the public queue `app_id`/`thread_id` and
    /// starts it unless `suspended`.
    pub fn init(
        handler: H,
        app_id: i16,
        thread_id: u16,
        queue_size: usize,
        suspended: bool,
    ) -> Result<Self> {
        let id = thread_queue_id(app_id, thread_id);
        let reader = PublicQueue::init(id, queue_size as i32, true, false, QueueMode::ReadWrite)?;
        Self::build(handler, reader, suspended)
    }
}

impl<H, T: ThreadMessage, Q: Inbox<T>> EventThread<H, T, Q>
where
    H: ThreadEventHandler<T, Q>,
{
    fn build(handler: H, reader: Q, suspended: bool) -> Result<Self> {
        let writer = reader.open_writer()?;
        let shared = Arc::new(ThreadShared {
            run_state: AtomicU8::new(0),
            suspend_count: AtomicI32::new(0),
            suspend_sem: Semaphore::new(0)?,
        });
        let handle = EventThreadHandle {
            queue: Arc::new(writer),
            shared,
            _marker: std::marker::PhantomData,
        };

        let mut thread = Self {
            handle,
            join: None,
            pending: Some((handler, reader)),
        };
        if !suspended {
            thread.start()?;
        }
        Ok(thread)
    }

    /// Starts a thread created suspended. Starting twice is an error.
    pub fn start(&mut self) -> Result<()> {
        let Some((handler, reader)) = self.pending.take() else {
            return Err(ThreadError::AlreadyInitialized);
        };

        let handle = self.handle.clone();
        let join = std::thread::Builder::new()
            .name("epcore-event".into())
            .spawn(move || run_pump(handler, &reader, &handle))
            .map_err(|e| ThreadError::Sync(epcore_sync::SyncError::Os {
                context: "thread spawn",
                source: e,
            }))?;
        self.join = Some(join);
        Ok(())
    }

    /// A cloneable handle for senders.
    pub fn handle(&self) -> EventThreadHandle<T, Q> {
        self.handle.clone()
    }

    /// Posts QUIT to the thread.
    pub fn quit(&self) -> Result<()> {
        self.handle.quit()
    }

    /// Waits for the thread to exit and returns the handler state.
    pub fn join(mut self) -> Result<H> {
        match self.join.take() {
            Some(join) => Ok(join.join().unwrap_or_else(|e| std::panic::resume_unwind(e))),
            None => Err(ThreadError::AlreadyInitialized),
        }
    }
}

impl<H, T: ThreadMessage, Q: Inbox<T>> std::fmt::Debug for EventThread<H, T, Q>
where
    H: ThreadEventHandler<T, Q>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventThread")
            .field("run_state", &self.handle.run_state())
            .finish_non_exhaustive()
    }
}

fn run_pump<H, T, Q>(mut handler: H, reader: &Q, handle: &EventThreadHandle<T, Q>) -> H
where
    H: ThreadEventHandler<T, Q>,
    T: ThreadMessage,
    Q: Inbox<T>,
{
    handle.shared.run_state.store(1, Ordering::SeqCst);

    let maps = H::message_map();
    handler.on_init(handle);

    loop {
        let msg = match reader.pop(true) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = %e, "inbox pop failed, stopping thread");
                break;
            }
        };

        let id = msg.message_id();
        if id >= MSG_USER {
            if !maps.dispatch(&mut handler, &msg) {
                handler.default_message_handler(&msg);
            }
        } else {
            match id {
                MSG_INIT => handler.on_init(handle),
                MSG_QUIT => {
                    handler.on_quit();
                    break;
                }
                MSG_SUSPEND => {
                    handler.on_suspend();
                    // block until resume() releases us
                    if let Err(e) = handle.shared.suspend_sem.decrement(true) {
                        tracing::error!(error = %e, "suspend wait failed");
                    }
                }
                MSG_TIMER => handler.on_timer(msg.data().as_u64()),
                _ => {}
            }
        }
    }

    handle.shared.run_state.store(2, Ordering::SeqCst);
    handler
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use epcore_queue::{EventMessage, MessageData};

    use super::*;
    use crate::dispatch::MessageMap;

    const MSG_RECORD: u32 = MSG_USER + 1;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Recorder {
        fn record(&mut self, msg: &EventMessage) {
            self.events.push(format!("user:{}", msg.data().as_u64()));
        }
    }

    impl ThreadEventHandler for Recorder {
        fn message_map() -> MessageMapChain<Self, EventMessage> {
            MessageMapChain::new().with(MessageMap::new().on(MSG_RECORD, |h: &mut Self, m| {
                h.record(m);
            }))
        }

        fn on_init(&mut self, _thread: &EventThreadHandle) {
            self.events.push("init".into());
        }

        fn on_quit(&mut self) {
            self.events.push("quit".into());
        }

        fn default_message_handler(&mut self, msg: &EventMessage) {
            self.events.push(format!("default:{}", msg.message_id()));
        }
    }

    #[test]
    fn test_dispatch_order() {
        let thread = PrivateEventThread::init(Recorder::default(), 64, false).unwrap();
        let handle = thread.handle();

        handle
            .send_message(
                EventMessage::with_data(MSG_RECORD, MessageData::from_u64(42)),
                true,
            )
            .unwrap();
        handle.send_id(MSG_USER + 5).unwrap();
        handle.quit().unwrap();

        let recorder = thread.join().unwrap();
        assert_eq!(
            recorder.events,
            vec!["init", "user:42", "default:10005", "quit"]
        );
    }

    #[test]
    fn test_suspend_resume_no_message_loss() {
        let thread = PrivateEventThread::init(Recorder::default(), 64, false).unwrap();
        let handle = thread.handle();

        handle.suspend().unwrap();
        for n in 0..10 {
            handle
                .send_message(
                    EventMessage::with_data(MSG_RECORD, MessageData::from_u64(n)),
                    true,
                )
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        handle.resume().unwrap();
        handle.quit().unwrap();

        let recorder = thread.join().unwrap();
        let users: Vec<&String> = recorder
            .events
            .iter()
            .filter(|e| e.starts_with("user:"))
            .collect();
        assert_eq!(users.len(), 10);
        assert_eq!(recorder.events.last().unwrap(), "quit");
    }

    #[test]
    fn test_suspended_start() {
        let mut thread = PrivateEventThread::init(Recorder::default(), 8, true).unwrap();
        let handle = thread.handle();
        assert_eq!(handle.run_state(), RunState::WaitingToRun);

        handle.send_id(MSG_USER + 5).unwrap();
        thread.start().unwrap();
        handle.quit().unwrap();
        let recorder = thread.join().unwrap();
        assert_eq!(recorder.events, vec!["init", "default:10005", "quit"]);
    }
}
