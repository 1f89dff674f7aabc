//! A file monitor object tied to one engine.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{MonitorError, Result};
use crate::event::{FileMonitorEvent, WatchId};
use crate::executor::InlineExecutor;
use crate::handle::MonitorHandle;
use crate::service::MonitorService;

/// Owns one engine of a [`MonitorService`] for as long as it lives.
///
/// The engine is constructed by [`FileMonitor::new`] and destroyed when the
/// monitor is dropped or [closed](FileMonitor::close), which wakes any
/// blocked or pending retrieval with [`MonitorError::Cancelled`].
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use codex_file_monitor::{EventLoop, FileMonitor, MonitorService};
///
/// let event_loop = EventLoop::new();
/// let service = MonitorService::new(Arc::new(event_loop.clone()))?;
/// let monitor = FileMonitor::new(&service)?;
/// monitor.add_path("/var/log", r".*\.log")?;
///
/// monitor.async_monitor(|result| match result {
///     Ok(event) => println!("{} {}", event.kind, event.path.display()),
///     Err(e) => eprintln!("monitor failed: {e}"),
/// });
/// event_loop.run();
/// ```
pub struct FileMonitor<'a> {
    service: &'a MonitorService,
    handle: MonitorHandle,
}

impl<'a> FileMonitor<'a> {
    /// Construct an engine on `service`.
    pub fn new(service: &'a MonitorService) -> Result<Self> {
        Ok(Self {
            service,
            handle: service.construct()?,
        })
    }

    /// The underlying engine handle.
    pub fn handle(&self) -> &MonitorHandle {
        &self.handle
    }

    /// Watch a directory. See [`MonitorService::add_path`].
    pub fn add_path(&self, path: impl AsRef<Path>, filter: &str) -> Result<WatchId> {
        self.service.add_path(&self.handle, path, filter)
    }

    /// Watch a regular file. See [`MonitorService::add_file`].
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<WatchId> {
        self.service.add_file(&self.handle, path)
    }

    /// Unregister a watch.
    pub fn remove(&self, id: WatchId) -> Result<()> {
        self.service.remove(&self.handle, id)
    }

    /// Block until the next event.
    pub fn monitor(&self) -> Result<FileMonitorEvent> {
        self.service.monitor(&self.handle)
    }

    /// Request the next event; `handler` runs on the service's executor.
    pub fn async_monitor<F>(&self, handler: F)
    where
        F: FnOnce(Result<FileMonitorEvent>) + Send + 'static,
    {
        self.service.async_monitor(&self.handle, handler);
    }

    /// Wait for the next event from async code.
    ///
    /// The pop runs on the service's worker regardless of its executor. If
    /// the future is dropped early, the event it would have received is
    /// discarded.
    pub async fn next_event(&self) -> Result<FileMonitorEvent> {
        let (tx, rx) = oneshot::channel();
        self.service.schedule(
            &self.handle,
            Arc::new(InlineExecutor),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or(Err(MonitorError::Cancelled))
    }

    /// Destroy the engine now.
    pub fn close(self) {
        self.service.destroy(self.handle);
    }
}
