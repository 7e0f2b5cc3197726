//! RemoteStore trait for the shared document store.
//!
//! The store has three surfaces: a blob store keyed by storage path, a record
//! table of document rows, and a change-notification channel. This trait is
//! the narrow slice of them the sync engine uses.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `HostedStore` (in docsync-daemon) - REST records/storage + realtime websocket

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::document::{Document, DocumentRecord, RecordSummary};
use crate::notification::ChangeNotification;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Ordered stream of remote changes.
pub type NotificationStream = BoxStream<'static, ChangeNotification>;

/// Activity entries written alongside record changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Created,
    Updated,
    Deleted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Created => "created",
            ActivityKind::Updated => "updated",
            ActivityKind::Deleted => "deleted",
        }
    }
}

/// Remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write (or overwrite) a blob.
    async fn put_blob(&self, key: &str, content: &[u8], mime_type: &str) -> Result<()>;

    /// Read a blob; `StoreError::NotFound` when absent.
    async fn read_blob(&self, key: &str) -> Result<Vec<u8>>;

    async fn remove_blob(&self, key: &str) -> Result<()>;

    /// Insert a new record for `doc`, returning the stored row (with its id).
    async fn insert_record(&self, doc: &Document, storage_path: &str) -> Result<DocumentRecord>;

    /// Overwrite the mutable fields of an existing record.
    async fn update_record(&self, id: &str, doc: &Document, storage_path: &str) -> Result<()>;

    /// Find the live record for a path within a workspace.
    async fn find_record(&self, workspace_id: &str, path: &str) -> Result<Option<DocumentRecord>>;

    async fn fetch_record(&self, id: &str) -> Result<Option<DocumentRecord>>;

    async fn delete_record(&self, id: &str) -> Result<()>;

    /// List a workspace's records without content, newest first.
    async fn list_records(&self, workspace_id: &str) -> Result<Vec<RecordSummary>>;

    /// Append to the activity log.
    async fn record_activity(
        &self,
        record_id: &str,
        workspace_id: &str,
        kind: ActivityKind,
    ) -> Result<()>;

    /// Open the change channel for a workspace.
    ///
    /// `StoreError::Transport` when the channel cannot be established.
    async fn subscribe(&self, workspace_id: &str) -> Result<NotificationStream>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    async fn put_blob(&self, key: &str, content: &[u8], mime_type: &str) -> Result<()> {
        (**self).put_blob(key, content, mime_type).await
    }

    async fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        (**self).read_blob(key).await
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        (**self).remove_blob(key).await
    }

    async fn insert_record(&self, doc: &Document, storage_path: &str) -> Result<DocumentRecord> {
        (**self).insert_record(doc, storage_path).await
    }

    async fn update_record(&self, id: &str, doc: &Document, storage_path: &str) -> Result<()> {
        (**self).update_record(id, doc, storage_path).await
    }

    async fn find_record(&self, workspace_id: &str, path: &str) -> Result<Option<DocumentRecord>> {
        (**self).find_record(workspace_id, path).await
    }

    async fn fetch_record(&self, id: &str) -> Result<Option<DocumentRecord>> {
        (**self).fetch_record(id).await
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        (**self).delete_record(id).await
    }

    async fn list_records(&self, workspace_id: &str) -> Result<Vec<RecordSummary>> {
        (**self).list_records(workspace_id).await
    }

    async fn record_activity(
        &self,
        record_id: &str,
        workspace_id: &str,
        kind: ActivityKind,
    ) -> Result<()> {
        (**self).record_activity(record_id, workspace_id, kind).await
    }

    async fn subscribe(&self, workspace_id: &str) -> Result<NotificationStream> {
        (**self).subscribe(workspace_id).await
    }
}
