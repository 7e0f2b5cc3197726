//! Sync client: the workspace-scoped operations the engine performs against
//! the remote store.
//!
//! Failures stop here. Every operation logs what went wrong and reports a
//! plain `bool` / `Option` so the engine loops never have to unwind.

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::document::{Document, RecordSummary};
use crate::remote::{ActivityKind, NotificationStream, RemoteStore, StoreError};

pub struct SyncClient<S: RemoteStore> {
    store: S,
}

impl<S: RemoteStore> SyncClient<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create a new remote document.
    ///
    /// The blob is written first; when that fails no record is created.
    /// Returns the new record id.
    pub async fn upload(&self, doc: &Document) -> Result<String, StoreError> {
        let key = doc.storage_key();
        self.store
            .put_blob(&key, doc.content.as_bytes(), &doc.mime_type)
            .await?;

        let record = self.store.insert_record(doc, &key).await?;
        self.log_activity(&record.id, &doc.workspace_id, ActivityKind::Created)
            .await;

        info!("Uploaded {} ({} bytes)", doc.path, doc.size);
        Ok(record.id)
    }

    /// Create or overwrite the remote document for `doc.path`.
    pub async fn update(&self, doc: &Document) -> bool {
        let existing = match self.store.find_record(&doc.workspace_id, &doc.path).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to look up {}: {}", doc.path, e);
                return false;
            }
        };

        let Some(record) = existing else {
            return match self.upload(doc).await {
                Ok(_) => true,
                Err(e) => {
                    error!("Failed to upload {}: {}", doc.path, e);
                    false
                }
            };
        };

        let key = doc.storage_key();
        if let Err(e) = self
            .store
            .put_blob(&key, doc.content.as_bytes(), &doc.mime_type)
            .await
        {
            error!("Failed to store {}: {}", doc.path, e);
            return false;
        }

        if let Err(e) = self.store.update_record(&record.id, doc, &key).await {
            error!("Failed to update record for {}: {}", doc.path, e);
            return false;
        }

        // The record now points at the derived key; drop a blob left at an older one
        if let Some(stale) = record
            .storage_path
            .as_deref()
            .filter(|stale| !stale.is_empty() && *stale != key)
        {
            if let Err(e) = self.store.remove_blob(stale).await {
                warn!("Failed to remove stale blob {}: {}", stale, e);
            }
        }

        self.log_activity(&record.id, &doc.workspace_id, ActivityKind::Updated)
            .await;
        info!("Updated {} ({} bytes)", doc.path, doc.size);
        true
    }

    /// Remove the remote document for `path`. A missing record counts as
    /// success.
    pub async fn delete(&self, path: &str, workspace_id: &str) -> bool {
        let record = match self.store.find_record(workspace_id, path).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No remote record for {}, nothing to delete", path);
                return true;
            }
            Err(e) => {
                error!("Failed to look up {}: {}", path, e);
                return false;
            }
        };

        if let Some(key) = record.storage_path.as_deref().filter(|key| !key.is_empty()) {
            if let Err(e) = self.store.remove_blob(key).await {
                warn!("Failed to remove blob {}: {}", key, e);
            }
        }

        self.log_activity(&record.id, workspace_id, ActivityKind::Deleted)
            .await;

        match self.store.delete_record(&record.id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                info!("Deleted {}", path);
                true
            }
            Err(e) => {
                error!("Failed to delete record for {}: {}", path, e);
                false
            }
        }
    }

    /// Content of a remote document by id.
    ///
    /// Reads the blob; when that fails, falls back to the record's inline
    /// content.
    pub async fn download(&self, id: &str) -> Option<String> {
        let record = match self.store.fetch_record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Remote record {} no longer exists", id);
                return None;
            }
            Err(e) => {
                error!("Failed to fetch record {}: {}", id, e);
                return None;
            }
        };

        if let Some(key) = record.storage_path.as_deref().filter(|key| !key.is_empty()) {
            match self.store.read_blob(key).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(content) => return Some(content),
                    Err(e) => warn!("Blob {} is not UTF-8, using inline content: {}", key, e),
                },
                Err(e) => debug!("Blob {} unavailable, using inline content: {}", key, e),
            }
        }

        Some(record.content)
    }

    /// Current remote content of `path`, `None` when there is no record.
    pub async fn get_content(&self, path: &str, workspace_id: &str) -> Option<String> {
        match self.store.find_record(workspace_id, path).await {
            Ok(Some(record)) => self.download(&record.id).await,
            Ok(None) => None,
            Err(e) => {
                error!("Failed to look up {}: {}", path, e);
                None
            }
        }
    }

    /// Summaries of every document in the workspace, newest first.
    pub async fn list(&self, workspace_id: &str) -> Vec<RecordSummary> {
        match self.store.list_records(workspace_id).await {
            Ok(summaries) => summaries,
            Err(e) => {
                error!("Failed to list workspace {}: {}", workspace_id, e);
                Vec::new()
            }
        }
    }

    /// Open the change stream for a workspace.
    ///
    /// Notifications for other workspaces are dropped; order is preserved.
    /// `None` when the channel is unavailable (sync continues one-way).
    pub async fn subscribe(&self, workspace_id: &str) -> Option<NotificationStream> {
        let stream = match self.store.subscribe(workspace_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Realtime subscription unavailable: {}", e);
                return None;
            }
        };

        info!("Subscribed to changes for workspace {}", workspace_id);

        let workspace_id = workspace_id.to_string();
        let filtered = stream.filter(move |notification| {
            let keep = notification.workspace_id() == Some(workspace_id.as_str());
            if !keep {
                debug!(
                    "Dropping {} notification for workspace {:?}",
                    notification.kind,
                    notification.workspace_id()
                );
            }
            futures::future::ready(keep)
        });

        Some(filtered.boxed())
    }

    async fn log_activity(&self, record_id: &str, workspace_id: &str, kind: ActivityKind) {
        if let Err(e) = self
            .store
            .record_activity(record_id, workspace_id, kind)
            .await
        {
            warn!("Failed to record {} activity: {}", kind.as_str(), e);
        }
    }
}
