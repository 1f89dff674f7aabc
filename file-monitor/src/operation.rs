//! The async bridge operation.
//!
//! A [`MonitorOperation`] is scheduled on the service's background worker,
//! performs one blocking pop against its target engine and posts the result
//! back to the caller's executor. It is consumed by running or cancelling,
//! so it can complete at most once.

use std::sync::Arc;

use tracing::trace;

use crate::error::{MonitorError, Result};
use crate::event::FileMonitorEvent;
use crate::executor::{Executor, KeepAlive};
use crate::handle::WeakHandle;

/// Completion handler of an async monitor request.
pub type MonitorHandler = Box<dyn FnOnce(Result<FileMonitorEvent>) + Send + 'static>;

pub(crate) struct MonitorOperation {
    target: WeakHandle,
    executor: Arc<dyn Executor>,
    work: KeepAlive,
    handler: MonitorHandler,
}

impl MonitorOperation {
    /// Create a pending operation. Takes a keep-alive on `executor` that is
    /// held until the handler has run there.
    pub(crate) fn new(
        target: WeakHandle,
        executor: Arc<dyn Executor>,
        handler: MonitorHandler,
    ) -> Self {
        let work = executor.keep_alive();
        Self {
            target,
            executor,
            work,
            handler,
        }
    }

    /// Pop one event from the target, blocking the current thread, and post
    /// the result.
    pub(crate) fn run(self) {
        let result = match self.target.upgrade() {
            Some(engine) => {
                trace!("monitor operation running");
                engine.pop_front_event()
            }
            None => {
                trace!("monitor target gone before the operation ran");
                Err(MonitorError::Cancelled)
            }
        };
        self.complete(result);
    }

    /// Resolve without touching the target.
    pub(crate) fn cancel(self) {
        trace!("monitor operation cancelled");
        self.complete(Err(MonitorError::Cancelled));
    }

    /// Resolve with `error` without touching the target.
    pub(crate) fn reject(self, error: MonitorError) {
        trace!("monitor operation rejected: {error}");
        self.complete(Err(error));
    }

    fn complete(self, result: Result<FileMonitorEvent>) {
        let Self {
            executor,
            work,
            handler,
            ..
        } = self;

        executor.post(Box::new(move || {
            handler(result);
            drop(work);
        }));
    }
}
