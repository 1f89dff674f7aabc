//! Configuration for the monitor service and its engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Default worker thread name.
const DEFAULT_WORKER_NAME: &str = "file-monitor-worker";

/// Default interval between scans for the polling backend.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for a [`MonitorService`](crate::MonitorService).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Which backend new engines use.
    pub backend: Backend,

    /// Interval between scans when `backend` is [`Backend::Poll`].
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Name given to the background worker thread.
    pub worker_name: String,
}

impl MonitorConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self {
            backend: Backend::Native,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the polling interval. Only used by the polling backend.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the worker thread name.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(MonitorError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        // Thread names may not contain NUL bytes.
        if self.worker_name.is_empty() || self.worker_name.contains('\0') {
            return Err(MonitorError::Config(format!(
                "invalid worker name: {:?}",
                self.worker_name
            )));
        }

        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which change-notification mechanism an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// The platform's native mechanism (inotify, FSEvents, ReadDirectoryChangesW).
    #[default]
    Native,

    /// Periodic re-scan of the watched paths.
    Poll,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
