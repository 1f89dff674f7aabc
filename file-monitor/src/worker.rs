//! The service's background worker.
//!
//! One thread pulls [`MonitorOperation`]s off a FIFO channel and runs them
//! serially. The channel sender is the worker's keep-alive: the thread idles
//! in `blocking_recv` while the sender exists and exits once it is dropped and
//! the queue is drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::operation::MonitorOperation;

pub(crate) struct Worker {
    /// Keep-alive. `None` once shutdown released it.
    sender: Option<mpsc::UnboundedSender<MonitorOperation>>,

    /// Set when shutdown begins; queued operations are cancelled from then on.
    stopping: Arc<AtomicBool>,

    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread.
    pub(crate) fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new().name(name.to_string()).spawn({
            let stopping = Arc::clone(&stopping);
            move || run(receiver, stopping)
        })?;

        Ok(Self {
            sender: Some(sender),
            stopping,
            thread: Some(thread),
        })
    }

    /// Queue an operation, or cancel it right away once shutdown has begun.
    pub(crate) fn schedule(&self, operation: MonitorOperation) {
        if self.is_stopping() {
            operation.cancel();
            return;
        }

        match &self.sender {
            Some(sender) => {
                if let Err(mpsc::error::SendError(operation)) = sender.send(operation) {
                    warn!("Worker gone, cancelling monitor operation");
                    operation.cancel();
                }
            }
            None => operation.cancel(),
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Stop accepting work. Operations still queued will be cancelled.
    pub(crate) fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// Release the keep-alive and wait for the thread to drain its queue.
    pub(crate) fn join(&mut self) {
        self.begin_shutdown();
        self.sender.take();

        let Some(thread) = self.thread.take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            warn!("Worker shutdown requested from the worker thread, detaching");
            return;
        }

        if thread.join().is_err() {
            error!("Worker thread panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

fn run(mut receiver: mpsc::UnboundedReceiver<MonitorOperation>, stopping: Arc<AtomicBool>) {
    info!("File monitor worker started");

    let mut cancelled = 0usize;
    while let Some(operation) = receiver.blocking_recv() {
        if stopping.load(Ordering::Acquire) {
            operation.cancel();
            cancelled += 1;
        } else {
            operation.run();
        }
    }

    if cancelled > 0 {
        debug!("Cancelled {cancelled} queued monitor operations during shutdown");
    }
    info!("File monitor worker stopped");
}
