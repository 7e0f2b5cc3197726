//! Local change upload: push one watcher event to the remote store.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::annotate::{annotate, strip};
use crate::document::{Document, ValidationError, filename_of};
use crate::engine::{Remote, SyncEngine};
use crate::events::{FileEvent, FileEventKind};
use crate::fs::{FileSystem, FsError};
use crate::remote::RemoteStore;

/// What handling a local event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Remote document created or overwritten
    Uploaded(String),
    /// Remote document removed (or was already gone)
    Deleted(String),
    /// Local body matches the remote body
    Unchanged(String),
    /// File kept out of sync
    Skipped(ValidationError),
    /// No workspace configured; event only logged
    LocalOnly(String),
    /// Read or remote failure
    Failed(String),
}

impl<F: FileSystem, S: RemoteStore> SyncEngine<F, S> {
    /// Handle a local filesystem event.
    ///
    /// Created and modified files are annotated and written through
    /// `SyncClient::update`, which creates the remote document when none
    /// exists, so a path never ends up with two records.
    pub async fn handle_local(&self, event: &FileEvent) -> UploadOutcome {
        let path = event.path.as_str();

        if let Err(e) = self.settings.filter.check_path(path) {
            debug!("Skipping {}: {}", path, e);
            return UploadOutcome::Skipped(e);
        }

        let Some(remote) = self.remote.as_ref() else {
            info!("File {}: {} (local-only mode)", event.kind, path);
            return UploadOutcome::LocalOnly(path.to_string());
        };

        let outcome = match event.kind {
            FileEventKind::Deleted => {
                if remote.client.delete(path, &remote.workspace_id).await {
                    UploadOutcome::Deleted(path.to_string())
                } else {
                    UploadOutcome::Failed(path.to_string())
                }
            }
            FileEventKind::Created | FileEventKind::Modified => {
                self.push_file(remote, path).await
            }
        };

        match &outcome {
            UploadOutcome::Failed(_) => self.status.record_error(),
            UploadOutcome::Uploaded(_) | UploadOutcome::Deleted(_) => self.status.record_sync(),
            _ => {}
        }
        outcome
    }

    async fn push_file(&self, remote: &Remote<S>, path: &str) -> UploadOutcome {
        let workspace_id = remote.workspace_id.as_str();

        let bytes = match self.fs.read(path).await {
            Ok(bytes) => bytes,
            Err(FsError::NotFound(_)) => {
                debug!("{} disappeared before it could be read", path);
                return UploadOutcome::Failed(path.to_string());
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path, e);
                return UploadOutcome::Failed(path.to_string());
            }
        };

        if let Err(e) = self.settings.filter.check_size(path, bytes.len() as u64) {
            warn!("Skipping {}", e);
            return UploadOutcome::Skipped(e);
        }

        let local = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                warn!("Skipping {}: not UTF-8 text", path);
                return UploadOutcome::Skipped(ValidationError::NotText(path.to_string()));
            }
        };

        let previous = remote.client.get_content(path, workspace_id).await;
        if previous.as_deref().map(strip) == Some(strip(&local)) {
            debug!("{} matches the remote copy", path);
            return UploadOutcome::Unchanged(path.to_string());
        }

        let now = Utc::now();
        let annotated = annotate(
            &local,
            filename_of(path),
            previous.as_deref(),
            &self.settings.user,
            now,
        );

        // The annotation can push a file just under the limit over it
        if let Err(e) = self.settings.filter.check_size(path, annotated.len() as u64) {
            warn!("Skipping {}", e);
            return UploadOutcome::Skipped(e);
        }

        let doc = Document::new(path, annotated, workspace_id, self.settings.user.as_str(), now);
        if remote.client.update(&doc).await {
            UploadOutcome::Uploaded(path.to_string())
        } else {
            UploadOutcome::Failed(path.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{Provenance, has_provenance};
    use crate::echo::EchoSuppressor;
    use crate::engine::testing::*;
    use crate::fs::InMemoryFs;
    use crate::memory_store::InMemoryStore;
    use crate::remote::ActivityKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_new_file_is_annotated_and_tagged() {
        let (engine, fs, store) = engine();
        fs.write("notes.md", b"Plan for the #sprint\n").await.unwrap();

        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "notes.md"))
            .await;

        assert_eq!(outcome, UploadOutcome::Uploaded("notes.md".into()));
        let record = store.record_for("ws", "notes.md").unwrap();
        assert_eq!(record.tags, vec!["sprint".to_string()]);
        assert!(has_provenance(&record.content));
        assert!(Provenance::parse(&record.content).unwrap().created.starts_with("Alice @ "));
        assert_eq!(record.last_editor.as_deref(), Some("Alice"));
        assert_eq!(record.size, record.content.len() as u64);
    }

    #[tokio::test]
    async fn test_unchanged_body_is_not_reuploaded() {
        let (engine, fs, store) = engine();
        fs.write("a.md", b"body\n").await.unwrap();
        let event = FileEvent::new(FileEventKind::Modified, "a.md");

        engine.handle_local(&event).await;
        let outcome = engine.handle_local(&event).await;

        assert_eq!(outcome, UploadOutcome::Unchanged("a.md".into()));
        assert_eq!(store.activity().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_extends_history() {
        let (engine, fs, store) = engine();
        fs.write("a.md", b"one\n").await.unwrap();
        engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "a.md"))
            .await;

        let uploaded = store.record_for("ws", "a.md").unwrap().content;
        fs.write("a.md", format!("{}two\n", uploaded).as_bytes())
            .await
            .unwrap();
        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Modified, "a.md"))
            .await;

        assert_eq!(outcome, UploadOutcome::Uploaded("a.md".into()));
        let records = store.records();
        assert_eq!(records.len(), 1);
        let provenance = Provenance::parse(&records[0].content).unwrap();
        assert_eq!(provenance.history.len(), 1);
        assert!(provenance.history[0].ends_with("[+2]"));
        assert_eq!(crate::annotate::strip(&records[0].content), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_oversized_file_is_skipped() {
        let (engine, fs, store) = engine();
        fs.write("big.md", &vec![b'x'; 2048]).await.unwrap();

        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "big.md"))
            .await;

        assert!(matches!(
            outcome,
            UploadOutcome::Skipped(ValidationError::TooLarge { size: 2048, .. })
        ));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_paths_are_skipped() {
        let (engine, _fs, _store) = engine();
        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "image.png"))
            .await;
        assert_eq!(
            outcome,
            UploadOutcome::Skipped(ValidationError::DisallowedExtension("image.png".into()))
        );
    }

    #[tokio::test]
    async fn test_delete_removes_remote_document() {
        let (engine, fs, store) = engine();
        fs.write("a.md", b"x").await.unwrap();
        engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "a.md"))
            .await;

        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Deleted, "a.md"))
            .await;

        assert_eq!(outcome, UploadOutcome::Deleted("a.md".into()));
        assert!(store.records().is_empty());
        let kinds: Vec<_> = store.activity().into_iter().map(|(_, kind)| kind).collect();
        assert_eq!(kinds, vec![ActivityKind::Created, ActivityKind::Deleted]);
    }

    #[tokio::test]
    async fn test_local_only_mode_only_logs() {
        let fs = InMemoryFs::new();
        fs.write("a.md", b"x").await.unwrap();
        let engine: SyncEngine<InMemoryFs, InMemoryStore> =
            SyncEngine::new(fs, Arc::new(EchoSuppressor::default()), settings());

        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "a.md"))
            .await;

        assert_eq!(outcome, UploadOutcome::LocalOnly("a.md".into()));
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported() {
        let (engine, fs, store) = engine();
        store.set_fail_blob_writes(true);
        fs.write("a.md", b"x").await.unwrap();

        let outcome = engine
            .handle_local(&FileEvent::new(FileEventKind::Created, "a.md"))
            .await;

        assert_eq!(outcome, UploadOutcome::Failed("a.md".into()));
        assert!(store.records().is_empty());
        assert_eq!(engine.status().snapshot().errors, 1);
    }
}
