//! File monitor events.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a watch, unique within one engine instance.
///
/// Engines issue ids starting at 1. `WatchId::default()` (0) only appears on
/// the empty event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(u64);

impl WatchId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<WatchId> for u64 {
    fn from(id: WatchId) -> Self {
        id.0
    }
}

/// A single observed filesystem change.
///
/// The default value is the empty event, which stands for "no real event".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMonitorEvent {
    /// The watch that matched this change.
    pub id: WatchId,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// The kind of change.
    pub kind: ChangeKind,

    /// When the change was observed, if known.
    pub timestamp: Option<DateTime<Utc>>,
}

impl FileMonitorEvent {
    /// Create an event stamped with the current time.
    pub fn new(id: WatchId, kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            kind,
            timestamp: Some(Utc::now()),
        }
    }

    /// Whether this is the empty event.
    pub fn is_empty(&self) -> bool {
        self.kind == ChangeKind::None
    }

    /// File name of the affected path, if it has one.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(std::ffi::OsStr::to_str)
    }
}

/// Kind of change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No change; only carried by the empty event.
    #[default]
    None,

    /// A file or directory was created.
    Added,

    /// Contents or metadata changed.
    Modified,

    /// A file or directory was deleted.
    Removed,

    /// A file or directory was renamed (either side of the rename).
    Renamed,
}

impl ChangeKind {
    /// Map a notify event kind. Access events and unclassified events carry
    /// no change and map to `None`.
    pub fn from_notify(kind: notify::EventKind) -> Self {
        use notify::EventKind;
        use notify::event::ModifyKind;

        match kind {
            EventKind::Create(_) => Self::Added,
            EventKind::Modify(ModifyKind::Name(_)) => Self::Renamed,
            EventKind::Modify(_) => Self::Modified,
            EventKind::Remove(_) => Self::Removed,
            // Poll backends report some changes without further detail.
            EventKind::Any => Self::Modified,
            EventKind::Access(_) | EventKind::Other => Self::None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
    use notify::EventKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_event_is_empty() {
        let event = FileMonitorEvent::default();
        assert!(event.is_empty());
        assert_eq!(event.id, WatchId::default());
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_event_creation() {
        let event = FileMonitorEvent::new(WatchId::new(3), ChangeKind::Added, "/test/a.txt");
        assert!(!event.is_empty());
        assert_eq!(event.id.get(), 3);
        assert_eq!(event.file_name(), Some("a.txt"));
        assert_eq!(event.path, PathBuf::from("/test/a.txt"));
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_notify_kind_mapping() {
        let cases = [
            (EventKind::Create(CreateKind::File), ChangeKind::Added),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                ChangeKind::Modified,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                ChangeKind::Renamed,
            ),
            (EventKind::Remove(RemoveKind::File), ChangeKind::Removed),
            (EventKind::Access(AccessKind::Any), ChangeKind::None),
        ];

        for (kind, expected) in cases {
            assert_eq!(ChangeKind::from_notify(kind), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_event_serializes_snake_case_kind() {
        let event = FileMonitorEvent {
            id: WatchId::new(7),
            path: PathBuf::from("/test/b.txt"),
            kind: ChangeKind::Removed,
            timestamp: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["kind"], "removed");
    }
}
