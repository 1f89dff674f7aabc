//! Execution contexts that completion handlers are posted onto.
//!
//! The service never calls a caller's handler directly. It posts the handler
//! onto an [`Executor`], which decides where it runs: an [`EventLoop`] the
//! caller drives, a tokio runtime, or inline on the posting thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use tracing::{trace, warn};

use crate::error::{MonitorError, Result};

/// A unit of work posted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch abstraction for a caller's execution context.
pub trait Executor: Send + Sync {
    /// Schedule `task` to run on this context. Must not run it inline unless
    /// the executor is documented to do so.
    fn post(&self, task: Task);

    /// A guard that keeps the context alive while outstanding work exists.
    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::none()
    }
}

/// Keep-alive guard returned by [`Executor::keep_alive`]. Releases its hold
/// on the context when dropped.
#[must_use = "the context is only kept alive while the guard is held"]
pub struct KeepAlive {
    guard: Option<Box<dyn Send>>,
}

impl KeepAlive {
    /// Wrap a guard value; dropping the `KeepAlive` drops it.
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            guard: Some(Box::new(guard)),
        }
    }

    /// A guard that holds nothing.
    pub fn none() -> Self {
        Self { guard: None }
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("active", &self.guard.is_some())
            .finish()
    }
}

enum LoopMessage {
    Task(Task),
    /// A keep-alive was released or the loop was stopped.
    Wake,
}

#[derive(Default)]
struct LoopCounters {
    queued: AtomicUsize,
    outstanding: AtomicUsize,
    stopped: AtomicBool,
}

/// A task queue run by whichever thread calls [`run`](EventLoop::run).
///
/// `run` executes posted tasks in order and returns once the loop is stopped,
/// or once no task is queued and no [`KeepAlive`] is outstanding. Clones share
/// the same queue.
#[derive(Clone)]
pub struct EventLoop {
    sender: channel::Sender<LoopMessage>,
    receiver: channel::Receiver<LoopMessage>,
    counters: Arc<LoopCounters>,
}

impl EventLoop {
    /// Create an empty loop.
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            counters: Arc::new(LoopCounters::default()),
        }
    }

    /// Run tasks until out of work or stopped. Returns the number run.
    pub fn run(&self) -> usize {
        self.run_until(None)
    }

    /// Like [`run`](Self::run), but also returns once `timeout` has elapsed.
    pub fn run_for(&self, timeout: Duration) -> usize {
        self.run_until(Some(Instant::now() + timeout))
    }

    /// Run the tasks that are ready without blocking.
    pub fn poll(&self) -> usize {
        let mut ran = 0;
        while !self.is_stopped() {
            match self.receiver.try_recv() {
                Ok(message) => ran += self.dispatch(message),
                Err(_) => break,
            }
        }
        ran
    }

    fn run_until(&self, deadline: Option<Instant>) -> usize {
        let mut ran = 0;
        loop {
            if self.is_stopped() {
                return ran;
            }
            if let Ok(message) = self.receiver.try_recv() {
                ran += self.dispatch(message);
                continue;
            }
            if self.counters.outstanding.load(Ordering::SeqCst) == 0 {
                return ran;
            }

            // Releasing a keep-alive sends a wake, so the check above is redone.
            let message = match deadline {
                None => self.receiver.recv().ok(),
                Some(deadline) => self.receiver.recv_deadline(deadline).ok(),
            };
            match message {
                Some(message) => ran += self.dispatch(message),
                None => return ran,
            }
        }
    }

    fn dispatch(&self, message: LoopMessage) -> usize {
        match message {
            LoopMessage::Task(task) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                task();
                1
            }
            LoopMessage::Wake => 0,
        }
    }

    /// Make every `run` return as soon as its current task finishes. Queued
    /// tasks stay queued until the loop is restarted and run again.
    pub fn stop(&self) {
        self.counters.stopped.store(true, Ordering::SeqCst);
        let _ = self.sender.send(LoopMessage::Wake);
    }

    /// Clear the stopped flag.
    pub fn restart(&self) {
        self.counters.stopped.store(false, Ordering::SeqCst);
    }

    /// Whether [`stop`](Self::stop) has been called since the last restart.
    pub fn is_stopped(&self) -> bool {
        self.counters.stopped.load(Ordering::SeqCst)
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field(
                "outstanding",
                &self.counters.outstanding.load(Ordering::SeqCst),
            )
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Executor for EventLoop {
    fn post(&self, task: Task) {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(LoopMessage::Task(task));
    }

    fn keep_alive(&self) -> KeepAlive {
        self.counters.outstanding.fetch_add(1, Ordering::SeqCst);
        KeepAlive::new(LoopWork {
            wake: self.sender.clone(),
            counters: Arc::clone(&self.counters),
        })
    }
}

struct LoopWork {
    wake: channel::Sender<LoopMessage>,
    counters: Arc<LoopCounters>,
}

impl Drop for LoopWork {
    fn drop(&mut self) {
        self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
        let _ = self.wake.send(LoopMessage::Wake);
    }
}

/// Posts tasks onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    /// Wrap a runtime handle.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the calling task runs on.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| MonitorError::Config(format!("no tokio runtime: {e}")))
    }
}

impl Executor for TokioExecutor {
    /// Spawns `task` onto the runtime. A runtime that has shut down drops
    /// spawned futures without polling them; the task then runs on the
    /// thread that drops it, so it still runs exactly once.
    fn post(&self, task: Task) {
        trace!("posting task onto tokio runtime");
        let mut task = RunOnDrop(Some(task));
        self.handle.spawn(async move { task.run() });
    }
}

/// Runs the wrapped task when dropped if nothing ran it before.
struct RunOnDrop(Option<Task>);

impl RunOnDrop {
    fn run(&mut self) {
        if let Some(task) = self.0.take() {
            task();
        }
    }
}

impl Drop for RunOnDrop {
    fn drop(&mut self) {
        if self.0.is_some() {
            warn!("tokio runtime dropped a posted task, running it inline");
            self.run();
        }
    }
}

/// Runs tasks immediately on the posting thread.
///
/// With a [`MonitorService`](crate::MonitorService) this means handlers run
/// on the background worker, so they must not block.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn post(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_run_without_work_returns() {
        let event_loop = EventLoop::new();
        assert_eq!(event_loop.run(), 0);
    }

    #[test]
    fn test_run_executes_in_order() {
        let event_loop = EventLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            event_loop.post(Box::new(move || order.lock().unwrap().push(i)));
        }

        assert_eq!(event_loop.pending(), 3);
        assert_eq!(event_loop.run(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_keep_alive_blocks_run_until_released() {
        let event_loop = EventLoop::new();
        let work = event_loop.keep_alive();
        let ran = Arc::new(AtomicUsize::new(0));

        let poster = {
            let event_loop = event_loop.clone();
            let ran = Arc::clone(&ran);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                event_loop.post(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }));
                drop(work);
            })
        };

        assert_eq!(event_loop.run(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        poster.join().unwrap();
    }

    #[test]
    fn test_run_for_times_out() {
        let event_loop = EventLoop::new();
        let _work = event_loop.keep_alive();

        let started = Instant::now();
        assert_eq!(event_loop.run_for(Duration::from_millis(50)), 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_stop_and_restart() {
        let event_loop = EventLoop::new();
        event_loop.post(Box::new(|| {}));
        event_loop.stop();

        assert!(event_loop.is_stopped());
        assert_eq!(event_loop.run(), 0);
        assert_eq!(event_loop.pending(), 1);

        event_loop.restart();
        assert_eq!(event_loop.poll(), 1);
    }

    #[test]
    fn test_inline_executor_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        InlineExecutor.post(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_executor_posts_onto_runtime() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        executor.post(Box::new(move || {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_tokio_executor_runs_task_after_runtime_shutdown() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let executor = TokioExecutor::new(runtime.handle().clone());
        drop(runtime);

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        executor.post(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_counts_tasks_not_wakeups() {
        let event_loop = EventLoop::new();
        drop(event_loop.keep_alive());
        event_loop.post(Box::new(|| {}));

        assert_eq!(event_loop.pending(), 1);
        assert_eq!(event_loop.run(), 1);
        assert_eq!(event_loop.pending(), 0);
    }
}
