#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Event-driven thread runtime.
//!
//! An [`EventThread`] is an OS thread married to an inbox queue: producers
//! push typed messages, the thread blocks on the queue's `filled` semaphore
//! and dispatches each message through a chain of per-type message maps.
//! System events (INIT, QUIT, SUSPEND, TIMER) route to fixed callbacks on the
//! handler; user events (ids ≥ [`epcore_queue::MSG_USER`]) resolve through
//! the map chain, most-derived first.
//!
//! [`WorkGroup`] runs N workers off one shared inbox for parallel dispatch,
//! and [`EventTimer`] delivers per-thread timer expirations as TIMER messages
//! through a real-time-signal handler.

pub mod dispatch;
pub mod error;
pub mod inbox;
pub mod thread;
pub mod timer;
pub mod workgroup;

pub use dispatch::{HandlerFn, MessageMap, MessageMapChain};
pub use error::{Result, ThreadError};
pub use inbox::Inbox;
pub use thread::{
    thread_queue_id, workgroup_queue_id, EventThread, EventThreadHandle, PrivateEventThread,
    PublicEventThread, RunState, ThreadEventHandler,
};
pub use timer::{install_timer_signal_handler, timer_signal, EventTimer};
pub use workgroup::{WorkGroup, WorkGroupHandle, WorkerEventHandler};
