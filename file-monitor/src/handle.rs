//! Ownership of engine instances.
//!
//! A [`MonitorHandle`] is the single strong owner of an engine. In-flight
//! operations only ever see a [`WeakHandle`], which refuses to upgrade once
//! the engine has been destroyed or released.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::engine::WatchEngine;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct EngineSlot {
    id: u64,
    /// Id of the service that constructed the engine.
    owner: u64,
    engine: Box<dyn WatchEngine>,
    destroyed: AtomicBool,
}

impl EngineSlot {
    /// Destroy the engine once. Returns false if it already was.
    pub(crate) fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.engine.destroy();
        debug!("Destroyed engine #{}", self.id);
        true
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }
}

impl Deref for EngineSlot {
    type Target = dyn WatchEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

/// Owning handle to an engine created by a
/// [`MonitorService`](crate::MonitorService).
///
/// Not cloneable. Dropping the handle destroys the engine, which wakes any
/// pop blocked on it.
pub struct MonitorHandle {
    slot: Arc<EngineSlot>,
}

impl MonitorHandle {
    pub(crate) fn new(engine: Box<dyn WatchEngine>, owner: u64) -> Self {
        Self {
            slot: Arc::new(EngineSlot {
                id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
                owner,
                engine,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique number of the engine, for logging.
    pub fn engine_id(&self) -> u64 {
        self.slot.id
    }

    /// Destroy the engine now, waking every pop blocked on it. Only the first
    /// call has an effect; the handle stays valid but every later operation
    /// through it fails with [`MonitorError::Cancelled`](crate::MonitorError::Cancelled).
    pub fn destroy(&self) {
        self.slot.destroy();
    }

    /// Whether the engine has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.slot.is_destroyed()
    }

    pub(crate) fn slot(&self) -> &EngineSlot {
        &self.slot
    }

    pub(crate) fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            slot: Arc::downgrade(&self.slot),
        }
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("engine_id", &self.slot.id)
            .field("destroyed", &self.slot.is_destroyed())
            .finish()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.slot.destroy();
    }
}

/// Non-owning, checked reference to an engine.
#[derive(Clone)]
pub(crate) struct WeakHandle {
    slot: Weak<EngineSlot>,
}

impl WeakHandle {
    /// Strong reference for the duration of one use, or `None` if the engine
    /// is gone or destroyed.
    pub(crate) fn upgrade(&self) -> Option<Arc<EngineSlot>> {
        self.slot.upgrade().filter(|slot| !slot.is_destroyed())
    }
}
