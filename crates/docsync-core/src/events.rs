//! Local filesystem events as seen by the sync engine.

use std::fmt::{self, Display, Formatter};

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to the watched root
    pub path: String,
    /// Type of event
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File appeared (including files already present when the watcher starts)
    Created,
    /// Known file changed on disk
    Modified,
    /// Known file was removed
    Deleted,
}

impl Display for FileEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}
