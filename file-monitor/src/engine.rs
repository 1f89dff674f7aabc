//! The watch engine contract.
//!
//! An engine owns the native watch handles and an internal event queue. The
//! service and the async bridge are written only against [`WatchEngine`], so
//! platform engines are interchangeable.

use std::path::Path;

use crate::error::Result;
use crate::event::{FileMonitorEvent, WatchId};

/// Capability set every watch engine provides.
///
/// All methods take `&self`: an engine is shared between the thread that
/// registers watches and the threads popping events.
pub trait WatchEngine: Send + Sync {
    /// Watch a directory. `filter` selects which changes are reported.
    fn add_path(&self, path: &Path, filter: &str) -> Result<WatchId>;

    /// Watch a single regular file.
    fn add_file(&self, path: &Path) -> Result<WatchId>;

    /// Unregister a watch. Unknown ids fail with
    /// [`MonitorError::NotFound`](crate::MonitorError::NotFound).
    fn remove(&self, id: WatchId) -> Result<()>;

    /// Take the oldest event, blocking until one is available, the engine
    /// is destroyed, or the backend fails.
    ///
    /// Concurrent callers each receive distinct events. After
    /// [`destroy`](Self::destroy) this returns
    /// [`MonitorError::Cancelled`](crate::MonitorError::Cancelled) without
    /// blocking.
    fn pop_front_event(&self) -> Result<FileMonitorEvent>;

    /// Release native resources and wake every blocked pop. Idempotent.
    fn destroy(&self);
}

/// Builds engines for a [`MonitorService`](crate::MonitorService).
pub trait EngineFactory: Send + Sync {
    /// Create a fresh engine.
    fn create(&self) -> Result<Box<dyn WatchEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn WatchEngine>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn WatchEngine>> {
        self()
    }
}
