//! Work groups: one shared inbox served by several worker threads.
//!
//! Handler parallelism is the point: two messages may be dispatched
//! concurrently on different workers, so ordering between them is not
//! preserved once the group has more than one worker.

use std::sync::Arc;
use std::thread::JoinHandle;

use epcore_queue::{
    EventMessage, MessageData, PrivateQueue, QueueMode, ThreadMessage, MSG_QUIT, MSG_TIMER,
    MSG_USER,
};

use crate::dispatch::MessageMapChain;
use crate::error::{Result, ThreadError};
use crate::inbox::Inbox;
use crate::timer::EventTimer;

/// Callbacks and message bindings for a work-group worker.
pub trait WorkerEventHandler<T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>>:
    Send + 'static
where
    Self: Sized,
{
    /// The user-message bindings, most-derived table first.
    fn message_map() -> MessageMapChain<Self, T> {
        MessageMapChain::new()
    }

    /// Runs in the worker thread before its first message.
    fn on_init(&mut self, _group: &WorkGroupHandle<T, Q>, _worker_id: i32) {}

    /// Runs when the worker dequeues QUIT, just before it exits.
    fn on_quit(&mut self) {}

    /// Runs when a TIMER message lands on this worker.
    fn on_timer(&mut self, _timer_id: u64) {}

    /// Called for user messages with no binding in the map chain.
    fn default_message_handler(&mut self, _msg: &T) {}
}

/// A cloneable write-side handle to a work group's shared inbox.
pub struct WorkGroupHandle<T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>> {
    queue: Arc<Q>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: ThreadMessage, Q: Inbox<T>> Clone for WorkGroupHandle<T, Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: ThreadMessage, Q: Inbox<T>> WorkGroupHandle<T, Q> {
    /// Sends a message to the group; the first idle worker dispatches it.
    pub fn send_message(&self, msg: T, wait: bool) -> Result<bool> {
        Ok(self.queue.push(msg, wait)?)
    }

    /// Sends a bare message id with an empty payload.
    pub fn send_id(&self, id: u32) -> Result<bool> {
        self.send_message(T::from_parts(id, MessageData::default()), true)
    }

    /// Binds `timer` to the group's inbox.
    pub fn init_timer(&self, timer: &mut EventTimer) -> Result<()> {
        let queue = Arc::clone(&self.queue);
        let msg = T::from_parts(MSG_TIMER, MessageData::from_u64(timer.id()));
        timer.bind(Box::new(move || queue.push(msg, false).unwrap_or(false)))
    }
}

impl<T: ThreadMessage, Q: Inbox<T>> std::fmt::Debug for WorkGroupHandle<T, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGroupHandle").finish_non_exhaustive()
    }
}

/// One shared inbox dispatched by `min..=max` worker threads.
pub struct WorkGroup<H, T: ThreadMessage = EventMessage, Q: Inbox<T> = PrivateQueue<T>>
where
    H: WorkerEventHandler<T, Q>,
{
    handle: WorkGroupHandle<T, Q>,
    template: Q,
    factory: Box<dyn FnMut(i32) -> H + Send>,
    workers: Vec<JoinHandle<H>>,
    max_workers: usize,
}

impl<H> WorkGroup<H, EventMessage, PrivateQueue<EventMessage>>
where
    H: WorkerEventHandler<EventMessage, PrivateQueue<EventMessage>>,
{
    /// Creates a group over a private inbox with `min` workers running and
    /// room to grow to `max`.
    pub fn init(
        factory: impl FnMut(i32) -> H + Send + 'static,
        min: usize,
        max: usize,
        queue_size: usize,
    ) -> Result<Self> {
        let template = PrivateQueue::new(queue_size, true, true, QueueMode::WriteOnly)?;
        Self::build(Box::new(factory), template, min, max)
    }
}

impl<H> WorkGroup<H, EventMessage, epcore_queue::PublicQueue>
where
    H: WorkerEventHandler<EventMessage, epcore_queue::PublicQueue>,
{
    /// Creates a group over the public queue `app_id`/`group_id`, so other
    /// processes can feed it by queue id.
    pub fn init_public(
        factory: impl FnMut(i32) -> H + Send + 'static,
        app_id: i16,
        group_id: u16,
        min: usize,
        max: usize,
        queue_size: usize,
    ) -> Result<Self> {
        let id = crate::thread::workgroup_queue_id(app_id, group_id);
        let template =
            epcore_queue::PublicQueue::init(id, queue_size as i32, true, true, QueueMode::WriteOnly)?;
        Self::build(Box::new(factory), template, min, max)
    }
}

impl<H, T: ThreadMessage, Q: Inbox<T>> WorkGroup<H, T, Q>
where
    H: WorkerEventHandler<T, Q>,
{
    fn build(
        factory: Box<dyn FnMut(i32) -> H + Send>,
        template: Q,
        min: usize,
        max: usize,
    ) -> Result<Self> {
        let max = max.max(min);
        let writer = template.open_writer()?;
        let mut group = Self {
            handle: WorkGroupHandle {
                queue: Arc::new(writer),
                _marker: std::marker::PhantomData,
            },
            template,
            factory,
            workers: Vec::with_capacity(max),
            max_workers: max,
        };
        for _ in 0..min {
            group.add_worker()?;
        }
        Ok(group)
    }

    /// Spawns one more worker, failing once the configured maximum is
    /// reached.
    pub fn add_worker(&mut self) -> Result<()> {
        if self.workers.len() >= self.max_workers {
            return Err(ThreadError::WorkerLimitReached(self.max_workers));
        }
        let worker_id = self.workers.len() as i32 + 1;
        let mut handler = (self.factory)(worker_id);
        let reader = self.template.open_reader()?;
        let handle = self.handle.clone();

        let join = std::thread::Builder::new()
            .name(format!("epcore-worker-{worker_id}"))
            .spawn(move || {
                let maps = H::message_map();
                handler.on_init(&handle, worker_id);
                run_worker(&mut handler, &maps, &reader);
                handler
            })
            .map_err(|e| {
                ThreadError::Sync(epcore_sync::SyncError::Os {
                    context: "worker spawn",
                    source: e,
                })
            })?;
        self.workers.push(join);
        Ok(())
    }

    /// Number of active workers.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// A cloneable handle for senders.
    pub fn handle(&self) -> WorkGroupHandle<T, Q> {
        self.handle.clone()
    }

    /// Posts one QUIT per active worker.
    pub fn quit(&self) -> Result<()> {
        for _ in 0..self.workers.len() {
            self.handle.send_id(MSG_QUIT)?;
        }
        Ok(())
    }

    /// Joins every worker and returns their handler states.
    pub fn join(&mut self) -> Vec<H> {
        self.workers
            .drain(..)
            .map(|j| j.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    }
}

impl<H, T: ThreadMessage, Q: Inbox<T>> std::fmt::Debug for WorkGroup<H, T, Q>
where
    H: WorkerEventHandler<T, Q>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGroup")
            .field("active_workers", &self.workers.len())
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

fn run_worker<H, T, Q>(handler: &mut H, maps: &MessageMapChain<H, T>, reader: &Q)
where
    H: WorkerEventHandler<T, Q>,
    T: ThreadMessage,
    Q: Inbox<T>,
{
    loop {
        let msg = match reader.pop(true) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = %e, "work group pop failed, stopping worker");
                return;
            }
        };

        let id = msg.message_id();
        if id >= MSG_USER {
            if !maps.dispatch(handler, &msg) {
                handler.default_message_handler(&msg);
            }
        } else {
            match id {
                MSG_QUIT => {
                    handler.on_quit();
                    return;
                }
                MSG_TIMER => handler.on_timer(msg.data().as_u64()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use epcore_queue::{EventMessage, MessageData};

    use super::*;
    use crate::dispatch::MessageMap;

    const MSG_WORK: u32 = MSG_USER + 7;

    struct Worker {
        worker_id: i32,
        processed: Arc<AtomicUsize>,
    }

    impl WorkerEventHandler for Worker {
        fn message_map() -> MessageMapChain<Self, EventMessage> {
            MessageMapChain::new().with(MessageMap::new().on(MSG_WORK, |h: &mut Self, _m| {
                h.processed.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }))
        }

        fn on_init(&mut self, _group: &WorkGroupHandle, worker_id: i32) {
            self.worker_id = worker_id;
        }
    }

    #[test]
    fn test_messages_spread_across_workers() {
        let processed = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&processed);
        let mut group = WorkGroup::init(
            move |_id| Worker {
                worker_id: 0,
                processed: Arc::clone(&p),
            },
            3,
            3,
            256,
        )
        .unwrap();

        let handle = group.handle();
        for n in 0..60 {
            handle
                .send_message(
                    EventMessage::with_data(MSG_WORK, MessageData::from_u64(n)),
                    true,
                )
                .unwrap();
        }
        group.quit().unwrap();
        let workers = group.join();

        assert_eq!(processed.load(Ordering::SeqCst), 60);
        assert_eq!(workers.len(), 3);
        let mut ids: Vec<i32> = workers.iter().map(|w| w.worker_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_worker_limit() {
        let mut group = WorkGroup::init(
            |_| Worker {
                worker_id: 0,
                processed: Arc::new(AtomicUsize::new(0)),
            },
            1,
            2,
            16,
        )
        .unwrap();
        assert_eq!(group.active_workers(), 1);
        group.add_worker().unwrap();
        assert!(matches!(
            group.add_worker(),
            Err(ThreadError::WorkerLimitReached(2))
        ));
        group.quit().unwrap();
        group.join();
    }
}
