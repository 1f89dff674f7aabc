//! The monitor service.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::engine::EngineFactory;
use crate::error::{MonitorError, Result};
use crate::event::{FileMonitorEvent, WatchId};
use crate::executor::Executor;
use crate::handle::{MonitorHandle, WeakHandle};
use crate::notify_engine::NotifyEngine;
use crate::operation::{MonitorHandler, MonitorOperation};
use crate::worker::Worker;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Long-lived service bound to one caller execution context.
///
/// The service constructs engines, forwards registrations to them, and offers
/// two ways of retrieving events:
///
/// - [`monitor`](Self::monitor) blocks the calling thread.
/// - [`async_monitor`](Self::async_monitor) returns immediately; a dedicated
///   background worker performs the blocking pop and the handler is posted
///   onto the service's [`Executor`].
///
/// Dropping the service cancels every outstanding async request (each handler
/// still runs exactly once, with [`MonitorError::Cancelled`]), destroys the
/// engines it constructed that are still alive, and joins the worker.
///
/// Handles are bound to the service that constructed them. Passing a handle
/// to another service fails with [`MonitorError::InvalidArgument`].
pub struct MonitorService {
    id: u64,
    executor: Arc<dyn Executor>,
    factory: Box<dyn EngineFactory>,
    config: MonitorConfig,

    /// Every engine constructed here, so shutdown can wake in-flight pops.
    engines: Mutex<Vec<WeakHandle>>,

    worker: Worker,
    shut_down: bool,
}

impl MonitorService {
    /// Create a service with the default config, posting handlers onto
    /// `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Result<Self> {
        Self::with_config(executor, MonitorConfig::default())
    }

    /// Create a service whose engines use the notify backend from `config`.
    pub fn with_config(executor: Arc<dyn Executor>, config: MonitorConfig) -> Result<Self> {
        let factory = NotifyEngine::factory(config.clone());
        Self::with_factory(executor, config, factory)
    }

    /// Create a service whose engines come from `factory`.
    pub fn with_factory(
        executor: Arc<dyn Executor>,
        config: MonitorConfig,
        factory: impl EngineFactory + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let worker = Worker::spawn(&config.worker_name)?;
        info!("File monitor service started ({:?} backend)", config.backend);

        Ok(Self {
            id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            executor,
            factory: Box::new(factory),
            config,
            engines: Mutex::new(Vec::new()),
            worker,
            shut_down: false,
        })
    }

    /// The service's configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The execution context handlers are posted onto.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Create a new engine owned by the returned handle.
    pub fn construct(&self) -> Result<MonitorHandle> {
        if self.worker.is_stopping() {
            return Err(MonitorError::Cancelled);
        }

        let handle = MonitorHandle::new(self.factory.create()?, self.id);
        debug!("Constructed engine #{}", handle.engine_id());

        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        engines.retain(|engine| engine.upgrade().is_some());
        engines.push(handle.downgrade());

        Ok(handle)
    }

    /// Destroy the engine, waking any pop blocked on it, and release it.
    pub fn destroy(&self, handle: MonitorHandle) {
        debug!("Destroying engine #{}", handle.engine_id());
        handle.destroy();
    }

    /// Watch the directory at `path`, reporting changes that pass `filter`.
    pub fn add_path(
        &self,
        handle: &MonitorHandle,
        path: impl AsRef<Path>,
        filter: &str,
    ) -> Result<WatchId> {
        self.check(handle)?;
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(MonitorError::InvalidArgument(format!(
                "{} is not a valid directory",
                path.display()
            )));
        }

        handle.slot().add_path(path, filter)
    }

    /// Watch the regular file at `path`.
    ///
    /// Symbolic links are rejected; resolve them first so the watched target
    /// is unambiguous.
    pub fn add_file(&self, handle: &MonitorHandle, path: impl AsRef<Path>) -> Result<WatchId> {
        self.check(handle)?;
        let path = path.as_ref();
        let metadata = fs::symlink_metadata(path).map_err(|e| {
            MonitorError::InvalidArgument(format!("{} is not a valid file: {e}", path.display()))
        })?;

        if metadata.file_type().is_symlink() {
            return Err(MonitorError::InvalidArgument(format!(
                "{} is a symlink and must be resolved",
                path.display()
            )));
        }
        if !metadata.is_file() {
            return Err(MonitorError::InvalidArgument(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        handle.slot().add_file(path)
    }

    /// Unregister a watch.
    pub fn remove(&self, handle: &MonitorHandle, id: WatchId) -> Result<()> {
        self.check(handle)?;
        handle.slot().remove(id)
    }

    /// Block until the engine yields an event or fails.
    pub fn monitor(&self, handle: &MonitorHandle) -> Result<FileMonitorEvent> {
        self.check(handle)?;
        handle.slot().pop_front_event()
    }

    /// Request the next event without blocking.
    ///
    /// `handler` runs exactly once on the service's executor: with the event,
    /// with the engine's error, or with [`MonitorError::Cancelled`] if the
    /// engine or the service goes away first.
    pub fn async_monitor<F>(&self, handle: &MonitorHandle, handler: F)
    where
        F: FnOnce(Result<FileMonitorEvent>) + Send + 'static,
    {
        self.schedule(handle, Arc::clone(&self.executor), Box::new(handler));
    }

    pub(crate) fn schedule(
        &self,
        handle: &MonitorHandle,
        executor: Arc<dyn Executor>,
        handler: MonitorHandler,
    ) {
        let operation = MonitorOperation::new(handle.downgrade(), executor, handler);
        if let Err(e) = self.check_owner(handle) {
            operation.reject(e);
            return;
        }
        self.worker.schedule(operation);
    }

    /// Reject handles constructed by another service; this service's
    /// shutdown could not interrupt a pop on them.
    fn check_owner(&self, handle: &MonitorHandle) -> Result<()> {
        if handle.slot().owner() != self.id {
            return Err(MonitorError::InvalidArgument(format!(
                "engine #{} belongs to another service",
                handle.engine_id()
            )));
        }
        Ok(())
    }

    fn check(&self, handle: &MonitorHandle) -> Result<()> {
        self.check_owner(handle)?;
        if handle.is_destroyed() {
            return Err(MonitorError::Cancelled);
        }
        Ok(())
    }

    /// Stop the service. Called by `Drop`; calling it earlier makes later
    /// requests resolve with [`MonitorError::Cancelled`].
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        info!("Shutting down file monitor service");
        self.worker.begin_shutdown();

        // A pop in flight on the worker only returns once its engine is destroyed.
        let engines = std::mem::take(
            &mut *self.engines.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for engine in engines {
            if let Some(slot) = engine.upgrade() {
                slot.destroy();
            }
        }

        self.worker.join();
        info!("File monitor service stopped");
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WatchEngine;
    use crate::event::ChangeKind;
    use crate::executor::EventLoop;
    use crate::queue::EventQueue;
    use std::time::{Duration, Instant};

    /// Engine whose events are injected by the test.
    #[derive(Clone, Default)]
    struct ScriptedEngine {
        queue: Arc<EventQueue>,
        next_id: Arc<AtomicU64>,
    }

    impl WatchEngine for ScriptedEngine {
        fn add_path(&self, _path: &Path, _filter: &str) -> Result<WatchId> {
            Ok(WatchId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
        }

        fn add_file(&self, path: &Path) -> Result<WatchId> {
            self.add_path(path, "")
        }

        fn remove(&self, id: WatchId) -> Result<()> {
            Err(MonitorError::NotFound(id))
        }

        fn pop_front_event(&self) -> Result<FileMonitorEvent> {
            self.queue.pop()
        }

        fn destroy(&self) {
            self.queue.close();
        }
    }

    fn scripted_service(engine: ScriptedEngine, event_loop: &EventLoop) -> MonitorService {
        MonitorService::with_factory(
            Arc::new(event_loop.clone()),
            MonitorConfig::default(),
            move || -> Result<Box<dyn WatchEngine>> { Ok(Box::new(engine.clone())) },
        )
        .unwrap()
    }

    #[test]
    fn test_async_monitor_delivers_event() {
        let engine = ScriptedEngine::default();
        let event_loop = EventLoop::new();
        let service = scripted_service(engine.clone(), &event_loop);
        let handle = service.construct().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        service.async_monitor(&handle, move |result| tx.send(result).unwrap());
        engine
            .queue
            .push(FileMonitorEvent::new(WatchId::new(1), ChangeKind::Modified, "/f"));

        assert_eq!(event_loop.run_for(Duration::from_secs(5)), 1);
        let event = rx.try_recv().unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Modified);
    }

    #[test]
    fn test_destroy_cancels_in_flight_request() {
        let event_loop = EventLoop::new();
        let service = scripted_service(ScriptedEngine::default(), &event_loop);
        let handle = service.construct().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        service.async_monitor(&handle, move |result| tx.send(result).unwrap());
        std::thread::sleep(Duration::from_millis(50));
        service.destroy(handle);

        assert_eq!(event_loop.run_for(Duration::from_secs(5)), 1);
        assert!(matches!(rx.try_recv().unwrap(), Err(MonitorError::Cancelled)));
    }

    #[test]
    fn test_requests_after_shutdown_are_cancelled() {
        let event_loop = EventLoop::new();
        let mut service = scripted_service(ScriptedEngine::default(), &event_loop);
        let handle = service.construct().unwrap();

        service.shutdown();
        assert!(handle.is_destroyed());
        assert!(matches!(service.construct(), Err(MonitorError::Cancelled)));

        let (tx, rx) = std::sync::mpsc::channel();
        service.async_monitor(&handle, move |result| tx.send(result).unwrap());

        assert_eq!(event_loop.run(), 1);
        assert!(matches!(rx.try_recv().unwrap(), Err(MonitorError::Cancelled)));
    }

    #[test]
    fn test_registration_on_destroyed_handle() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let event_loop = EventLoop::new();
        let service = scripted_service(ScriptedEngine::default(), &event_loop);
        let handle = service.construct().unwrap();
        handle.destroy();

        assert!(matches!(
            service.add_path(&handle, temp_dir.path(), ".*"),
            Err(MonitorError::Cancelled)
        ));
        assert!(matches!(
            service.remove(&handle, WatchId::new(1)),
            Err(MonitorError::Cancelled)
        ));
        assert!(matches!(service.monitor(&handle), Err(MonitorError::Cancelled)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MonitorConfig::default().with_poll_interval(Duration::ZERO);
        let result = MonitorService::with_config(Arc::new(EventLoop::new()), config);
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_async_monitor_passes_engine_error_through() {
        let engine = ScriptedEngine::default();
        let event_loop = EventLoop::new();
        let service = scripted_service(engine.clone(), &event_loop);
        let handle = service.construct().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        service.async_monitor(&handle, move |result| tx.send(result).unwrap());
        engine
            .queue
            .push_error(MonitorError::Config("backend failed".to_string()));

        assert_eq!(event_loop.run_for(Duration::from_secs(5)), 1);
        match rx.try_recv().unwrap() {
            Err(MonitorError::Config(message)) => assert_eq!(message, "backend failed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_monitor_passes_engine_error_through() {
        let engine = ScriptedEngine::default();
        let event_loop = EventLoop::new();
        let service = scripted_service(engine.clone(), &event_loop);
        let handle = service.construct().unwrap();

        engine
            .queue
            .push_error(MonitorError::Config("backend failed".to_string()));

        assert!(matches!(
            service.monitor(&handle),
            Err(MonitorError::Config(message)) if message == "backend failed"
        ));
    }

    #[test]
    fn test_foreign_handle_is_rejected_and_teardown_does_not_block() {
        let owner_loop = EventLoop::new();
        let owner = scripted_service(ScriptedEngine::default(), &owner_loop);
        let handle = owner.construct().unwrap();

        let other_loop = EventLoop::new();
        let other = scripted_service(ScriptedEngine::default(), &other_loop);

        let (tx, rx) = std::sync::mpsc::channel();
        other.async_monitor(&handle, move |result| tx.send(result).unwrap());
        assert!(matches!(
            other.monitor(&handle),
            Err(MonitorError::InvalidArgument(_))
        ));
        assert!(matches!(
            other.remove(&handle, WatchId::new(1)),
            Err(MonitorError::InvalidArgument(_))
        ));

        // The owner's engine is still alive, so this would hang if the
        // request had reached the other service's worker.
        let started = Instant::now();
        drop(other);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!handle.is_destroyed());

        assert_eq!(other_loop.run(), 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(MonitorError::InvalidArgument(_))
        ));
    }
}
