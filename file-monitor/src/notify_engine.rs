//! Watch engine backed by the `notify` crate.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use crate::config::{Backend, MonitorConfig};
use crate::engine::{EngineFactory, WatchEngine};
use crate::error::{MonitorError, Result};
use crate::event::{ChangeKind, FileMonitorEvent, WatchId};
use crate::filter::PathFilter;
use crate::queue::EventQueue;

/// A registered watch.
#[derive(Debug)]
struct Watch {
    /// Canonical path of the watched directory or file.
    target: PathBuf,
    kind: WatchKind,
}

#[derive(Debug)]
enum WatchKind {
    Directory(PathFilter),
    File,
}

impl Watch {
    fn matches(&self, path: &Path) -> bool {
        match &self.kind {
            WatchKind::Directory(filter) => {
                path != self.target && path.starts_with(&self.target) && filter.matches(path)
            }
            WatchKind::File => path == self.target,
        }
    }
}

/// State shared with the notify callback.
struct Shared {
    watches: RwLock<BTreeMap<WatchId, Watch>>,
    queue: EventQueue,
}

impl Shared {
    fn dispatch(&self, res: notify::Result<notify::Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {e}");
                self.queue.push_error(MonitorError::Notify(e));
                return;
            }
        };

        let kind = ChangeKind::from_notify(event.kind);
        if kind == ChangeKind::None {
            return;
        }

        let watches = self.watches.read().unwrap_or_else(PoisonError::into_inner);
        for path in &event.paths {
            for (id, watch) in watches.iter() {
                if watch.matches(path) {
                    trace!("watch {id}: {kind} {}", path.display());
                    self.queue.push(FileMonitorEvent::new(*id, kind, path));
                }
            }
        }
    }
}

/// The notify watcher plus a reference count of OS watches per path.
struct OsWatcher {
    watcher: Box<dyn Watcher + Send>,
    watched: HashMap<PathBuf, usize>,
}

/// Engine using the platform's native notification mechanism, or periodic
/// re-scans when configured with [`Backend::Poll`].
///
/// Directory watches are recursive. Several watches may target the same path;
/// the OS watch is only dropped when the last of them is removed.
pub struct NotifyEngine {
    shared: Arc<Shared>,

    /// `None` once destroyed.
    watcher: Mutex<Option<OsWatcher>>,

    next_id: AtomicU64,
}

impl NotifyEngine {
    /// Create a new engine with the backend selected by `config`.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            watches: RwLock::new(BTreeMap::new()),
            queue: EventQueue::new(),
        });

        let handler_shared = Arc::clone(&shared);
        let handler = move |res: notify::Result<notify::Event>| handler_shared.dispatch(res);

        let watcher: Box<dyn Watcher + Send> = match config.backend {
            Backend::Native => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
            Backend::Poll => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(config.poll_interval),
            )?),
        };

        debug!("Created notify engine ({:?} backend)", config.backend);

        Ok(Self {
            shared,
            watcher: Mutex::new(Some(OsWatcher {
                watcher,
                watched: HashMap::new(),
            })),
            next_id: AtomicU64::new(1),
        })
    }

    /// A factory creating engines from a copy of `config`.
    pub fn factory(config: MonitorConfig) -> impl EngineFactory {
        move || -> Result<Box<dyn WatchEngine>> { Ok(Box::new(NotifyEngine::new(&config)?)) }
    }

    #[cfg(test)]
    fn watch_count(&self) -> usize {
        self.shared
            .watches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<OsWatcher>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, path: &Path, mode: RecursiveMode, kind: WatchKind) -> Result<WatchId> {
        let target = path.canonicalize()?;

        let mut guard = self.lock_watcher();
        let os = guard.as_mut().ok_or(MonitorError::Cancelled)?;

        let count = os.watched.get(&target).copied().unwrap_or(0);
        if count == 0 {
            os.watcher.watch(&target, mode)?;
        }
        os.watched.insert(target.clone(), count + 1);

        let id = WatchId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!("Watching {} as {id}", target.display());
        self.shared
            .watches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Watch { target, kind });

        Ok(id)
    }
}

impl WatchEngine for NotifyEngine {
    fn add_path(&self, path: &Path, filter: &str) -> Result<WatchId> {
        if !path.is_dir() {
            return Err(MonitorError::InvalidArgument(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let filter = PathFilter::parse(filter)?;
        self.register(path, RecursiveMode::Recursive, WatchKind::Directory(filter))
    }

    fn add_file(&self, path: &Path) -> Result<WatchId> {
        if !path.is_file() {
            return Err(MonitorError::InvalidArgument(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        self.register(path, RecursiveMode::NonRecursive, WatchKind::File)
    }

    fn remove(&self, id: WatchId) -> Result<()> {
        let mut guard = self.lock_watcher();
        let os = guard.as_mut().ok_or(MonitorError::Cancelled)?;

        let watch = self
            .shared
            .watches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(MonitorError::NotFound(id))?;

        match os.watched.get(&watch.target).copied() {
            Some(count) if count > 1 => {
                os.watched.insert(watch.target.clone(), count - 1);
            }
            _ => {
                os.watched.remove(&watch.target);
                // The target may already be gone, which drops the OS watch anyway.
                if let Err(e) = os.watcher.unwatch(&watch.target) {
                    warn!("Failed to unwatch {}: {e}", watch.target.display());
                }
            }
        }

        info!("Removed watch {id} on {}", watch.target.display());
        Ok(())
    }

    fn pop_front_event(&self) -> Result<FileMonitorEvent> {
        self.shared.queue.pop()
    }

    fn destroy(&self) {
        self.shared.queue.close();

        // Dropped outside the lock so a callback running concurrently can finish.
        let watcher = self.lock_watcher().take();
        if let Some(os) = watcher {
            drop(os);
            self.shared
                .watches
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!("Notify engine destroyed");
        }
    }
}

impl Drop for NotifyEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}
