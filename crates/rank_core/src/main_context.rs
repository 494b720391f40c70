//! # Main Context
//!
//! All cache writes and every host-visible effect happen on one serialized
//! execution context. Gateway I/O runs on the tokio worker pool; whatever it
//! produces is handed back here before it touches shared state.
//!
//! ## Pieces
//!
//! - [`MainHandle`] - cloneable sender. [`MainHandle::run`] enqueues a task,
//!   [`MainHandle::call`] enqueues one and awaits its return value.
//! - [`MainLoop`] - the single consumer. It drains every queued task once per
//!   wake-up and stops after shutdown is initiated.
//! - [`is_main_context`] - true only while a queued task is executing, so
//!   writers can assert where they run.
//!
//! A panicking task is logged and dropped; the loop keeps serving the queue.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::MainContextClosed;
use crate::shutdown::ShutdownState;

/// A unit of work for the main context.
pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_MAIN: Cell<bool> = const { Cell::new(false) };
}

/// Returns true while the current thread is executing a main-context task.
pub fn is_main_context() -> bool {
    ON_MAIN.with(Cell::get)
}

struct MainMarker;

impl MainMarker {
    fn enter() -> Self {
        ON_MAIN.with(|flag| flag.set(true));
        MainMarker
    }
}

impl Drop for MainMarker {
    fn drop(&mut self) {
        ON_MAIN.with(|flag| flag.set(false));
    }
}

fn execute(task: MainTask) {
    let _marker = MainMarker::enter();
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("❌ Main context task panicked; continuing with the next task");
    }
}

/// Creates a connected handle/loop pair.
pub fn main_context() -> (MainHandle, MainLoop) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MainHandle { sender }, MainLoop { receiver })
}

/// Enqueues work for the main context.
#[derive(Clone)]
pub struct MainHandle {
    sender: mpsc::UnboundedSender<MainTask>,
}

impl MainHandle {
    /// Enqueues `task` and returns immediately.
    ///
    /// Returns false if the main loop has already stopped.
    pub fn run<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            warn!("⚠️ Main context closed; dropping queued task");
            return false;
        }
        true
    }

    /// Enqueues `task` and waits for its result.
    pub async fn call<F, R>(&self, task: F) -> Result<R, MainContextClosed>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.run(move || {
            let _ = reply.send(task());
        });
        result.await.map_err(|_| MainContextClosed)
    }

    /// Waits until every task queued before this call has executed.
    pub async fn flush(&self) -> Result<(), MainContextClosed> {
        self.call(|| ()).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The single consumer of main-context work.
pub struct MainLoop {
    receiver: mpsc::UnboundedReceiver<MainTask>,
}

impl MainLoop {
    /// Executes every task currently queued, including ones those tasks
    /// enqueue, and returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.receiver.try_recv() {
            execute(task);
            executed += 1;
        }
        executed
    }

    /// Serves the queue until shutdown is initiated.
    ///
    /// `tick` bounds how long a shutdown request can go unnoticed when the
    /// queue is idle. Work still queued when shutdown is seen is executed
    /// before returning.
    pub async fn run(mut self, shutdown: ShutdownState, tick: Duration) {
        let mut ticker = interval(tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🎮 Main context started (tick {}ms)", tick.as_millis());

        loop {
            tokio::select! {
                task = self.receiver.recv() => match task {
                    Some(task) => {
                        execute(task);
                        self.drain();
                    }
                    None => {
                        debug!("Main context queue closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if shutdown.is_shutdown_initiated() {
                        let remaining = self.drain();
                        info!("🕒 Main context stopping - executed {} remaining task(s)", remaining);
                        break;
                    }
                }
            }
        }

        info!("✅ Main context loop completed gracefully");
    }
}
