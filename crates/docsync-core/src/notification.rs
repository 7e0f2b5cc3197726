//! Remote change notifications.
//!
//! Transports decode their raw payloads into `ChangeNotification` at the
//! boundary; unknown kinds are rejected there, so everything past this point
//! matches exhaustively on `ChangeKind`.

use crate::document::DocumentRecord;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown change kind: {0}")]
pub struct UnknownChangeKind(pub String);

/// What happened to a remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl FromStr for ChangeKind {
    type Err = UnknownChangeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            _ => Err(UnknownChangeKind(s.to_string())),
        }
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One change delivered by the remote store's notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    /// Record before the change (deletes, and updates when the store sends it)
    pub before: Option<DocumentRecord>,
    /// Record after the change (inserts and updates)
    pub after: Option<DocumentRecord>,
}

impl ChangeNotification {
    pub fn insert(record: DocumentRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            before: None,
            after: Some(record),
        }
    }

    pub fn update(before: Option<DocumentRecord>, after: DocumentRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            before,
            after: Some(after),
        }
    }

    pub fn delete(record: DocumentRecord) -> Self {
        Self {
            kind: ChangeKind::Delete,
            before: Some(record),
            after: None,
        }
    }

    /// The record this notification is about: `after` for inserts and
    /// updates, `before` for deletes.
    pub fn record(&self) -> Option<&DocumentRecord> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.after.as_ref(),
            ChangeKind::Delete => self.before.as_ref(),
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.record().map(|r| r.workspace_id.as_str())
    }

    /// Local path affected by this change.
    pub fn path(&self) -> Option<&str> {
        self.record().map(DocumentRecord::path)
    }
}
