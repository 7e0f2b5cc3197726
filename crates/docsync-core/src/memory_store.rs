//! In-memory remote store for testing.
//!
//! Behaves like the hosted store from the engine's point of view: record
//! writes made through the trait are echoed to subscribers as notifications,
//! just as the real channel reports a replica's own writes back to it.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::document::{Document, DocumentRecord, RecordSummary};
use crate::notification::ChangeNotification;
use crate::remote::{ActivityKind, NotificationStream, RemoteStore, Result, StoreError};

pub struct InMemoryStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    records: RwLock<BTreeMap<String, DocumentRecord>>,
    activity: Mutex<Vec<(String, ActivityKind)>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeNotification>>>,
    fail_blob_writes: AtomicBool,
    fail_record_reads: AtomicBool,
    failing_records: Mutex<BTreeSet<String>>,
    fail_subscribe: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            records: RwLock::new(BTreeMap::new()),
            activity: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            fail_blob_writes: AtomicBool::new(false),
            fail_record_reads: AtomicBool::new(false),
            failing_records: Mutex::new(BTreeSet::new()),
            fail_subscribe: AtomicBool::new(false),
        }
    }

    /// Make every `put_blob` fail.
    pub fn set_fail_blob_writes(&self, fail: bool) {
        self.fail_blob_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `fetch_record` fail (simulates a flaky read path).
    pub fn set_fail_record_reads(&self, fail: bool) {
        self.fail_record_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `fetch_record` fail for one record id only.
    pub fn fail_record(&self, id: &str) {
        self.failing_records.lock().unwrap().insert(id.to_string());
    }

    /// Make `subscribe` fail with a transport error.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().unwrap().get(key).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    pub fn record_for(&self, workspace_id: &str, path: &str) -> Option<DocumentRecord> {
        self.records
            .read()
            .unwrap()
            .values()
            .find(|r| r.workspace_id == workspace_id && r.path() == path)
            .cloned()
    }

    pub fn activity(&self) -> Vec<(String, ActivityKind)> {
        self.activity.lock().unwrap().clone()
    }

    /// Store a record and blob as if another replica had uploaded it,
    /// notifying subscribers with an insert.
    pub fn seed(&self, record: DocumentRecord, blob: &str) {
        if let Some(key) = &record.storage_path {
            self.blobs
                .write()
                .unwrap()
                .insert(key.clone(), blob.as_bytes().to_vec());
        }
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        self.publish(ChangeNotification::insert(record));
    }

    /// Remove a record as if another replica had deleted it.
    pub fn remove(&self, id: &str) -> Option<DocumentRecord> {
        let removed = self.records.write().unwrap().remove(id)?;
        self.publish(ChangeNotification::delete(removed.clone()));
        Some(removed)
    }

    /// Deliver a notification to every subscriber, dropping closed ones.
    pub fn publish(&self, notification: ChangeNotification) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.unbounded_send(notification.clone()).is_ok());
    }

    fn to_record(id: String, doc: &Document, storage_path: &str) -> DocumentRecord {
        DocumentRecord {
            id,
            filename: doc.filename.clone(),
            original_path: Some(doc.path.clone()),
            content: doc.content.clone(),
            size: doc.size,
            mime_type: doc.mime_type.clone(),
            storage_path: Some(storage_path.to_string()),
            workspace_id: doc.workspace_id.clone(),
            group: doc.group.clone(),
            tags: doc.tags.clone(),
            last_editor: Some(doc.last_editor.clone()),
            updated_at: doc.modified_at,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn put_blob(&self, key: &str, content: &[u8], _mime_type: &str) -> Result<()> {
        if self.fail_blob_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage(format!("blob write rejected: {}", key)));
        }
        self.blobs
            .write()
            .unwrap()
            .insert(key.to_string(), content.to_vec());
        Ok(())
    }

    async fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        self.blob(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        self.blobs.write().unwrap().remove(key);
        Ok(())
    }

    async fn insert_record(&self, doc: &Document, storage_path: &str) -> Result<DocumentRecord> {
        let record = Self::to_record(uuid::Uuid::new_v4().to_string(), doc, storage_path);
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        self.publish(ChangeNotification::insert(record.clone()));
        Ok(record)
    }

    async fn update_record(&self, id: &str, doc: &Document, storage_path: &str) -> Result<()> {
        let (before, after) = {
            let mut records = self.records.write().unwrap();
            let existing = records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let before = existing.clone();
            *existing = Self::to_record(id.to_string(), doc, storage_path);
            (before, existing.clone())
        };
        self.publish(ChangeNotification::update(Some(before), after));
        Ok(())
    }

    async fn find_record(&self, workspace_id: &str, path: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.record_for(workspace_id, path))
    }

    async fn fetch_record(&self, id: &str) -> Result<Option<DocumentRecord>> {
        if self.fail_record_reads.load(Ordering::SeqCst)
            || self.failing_records.lock().unwrap().contains(id)
        {
            return Err(StoreError::Transport(format!("record read failed: {}", id)));
        }
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        self.remove(id);
        Ok(())
    }

    async fn list_records(&self, workspace_id: &str) -> Result<Vec<RecordSummary>> {
        let records = self.records.read().unwrap();
        let mut summaries: Vec<RecordSummary> = records
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .map(RecordSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn record_activity(
        &self,
        record_id: &str,
        _workspace_id: &str,
        kind: ActivityKind,
    ) -> Result<()> {
        self.activity
            .lock()
            .unwrap()
            .push((record_id.to_string(), kind));
        Ok(())
    }

    async fn subscribe(&self, _workspace_id: &str) -> Result<NotificationStream> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("channel unavailable".into()));
        }
        // Like a shared channel: every subscriber sees every workspace
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(path: &str, content: &str) -> Document {
        Document::new(path, content, "ws", "Alice", Utc::now())
    }

    #[tokio::test]
    async fn test_record_writes_are_announced() {
        let store = InMemoryStore::new();
        let mut changes = store.subscribe("ws").await.unwrap();

        let doc = doc("q3/a.md", "hello");
        let record = store.insert_record(&doc, &doc.storage_key()).await.unwrap();
        store
            .update_record(&record.id, &doc, &doc.storage_key())
            .await
            .unwrap();
        store.delete_record(&record.id).await.unwrap();

        let kinds: Vec<_> = changes.by_ref().take(3).map(|n| n.kind).collect().await;
        assert_eq!(
            kinds,
            vec![
                crate::ChangeKind::Insert,
                crate::ChangeKind::Update,
                crate::ChangeKind::Delete
            ]
        );
    }

    #[tokio::test]
    async fn test_listing_is_scoped_to_workspace() {
        let store = InMemoryStore::new();
        let ours = doc("a.md", "1");
        let theirs = Document::new("b.md", "2", "other", "Bob", Utc::now());
        store.insert_record(&ours, &ours.storage_key()).await.unwrap();
        store.insert_record(&theirs, &theirs.storage_key()).await.unwrap();

        let listed = store.list_records("ws").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path(), "a.md");
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = InMemoryStore::new();
        store.set_fail_blob_writes(true);
        store.set_fail_subscribe(true);

        assert!(matches!(
            store.put_blob("ws/a.md", b"x", "text/markdown").await,
            Err(StoreError::Storage(_))
        ));
        assert!(matches!(
            store.subscribe("ws").await,
            Err(StoreError::Transport(_))
        ));
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_single_record_failure() {
        let store = InMemoryStore::new();
        let a = doc("a.md", "1");
        let b = doc("b.md", "2");
        let a = store.insert_record(&a, &a.storage_key()).await.unwrap();
        let b = store.insert_record(&b, &b.storage_key()).await.unwrap();
        store.fail_record(&b.id);

        assert!(store.fetch_record(&a.id).await.unwrap().is_some());
        assert!(matches!(
            store.fetch_record(&b.id).await,
            Err(StoreError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_records_carry_document_timestamp() {
        let store = InMemoryStore::new();
        let modified_at = Utc::now() - chrono::Duration::hours(2);
        let doc = Document::new("a.md", "x", "ws", "Alice", modified_at);

        let record = store.insert_record(&doc, &doc.storage_key()).await.unwrap();
        assert_eq!(record.updated_at, modified_at);
    }
}
