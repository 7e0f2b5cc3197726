//! Remote change dispatch: apply one change notification to the local folder.

use tracing::{debug, error, info, warn};

use crate::document::is_safe_relative_path;
use crate::engine::SyncEngine;
use crate::fs::{FileSystem, FsError};
use crate::notification::{ChangeKind, ChangeNotification};
use crate::remote::RemoteStore;

/// What applying a notification did to the local folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// File written with the remote content
    Written(String),
    /// Local file already held the remote content
    Unchanged(String),
    /// Local file removed
    Removed(String),
    /// Delete for a file that was not present locally
    Absent(String),
    /// Notification carried nothing actionable
    Ignored,
    /// Download or filesystem failure
    Failed(String),
}

impl<F: FileSystem, S: RemoteStore> SyncEngine<F, S> {
    /// Apply a remote change.
    ///
    /// The path is marked in the echo tracker before the filesystem is
    /// touched, so the watcher event caused by the write is dropped.
    pub async fn apply_remote(&self, notification: &ChangeNotification) -> DispatchOutcome {
        let Some(remote) = self.remote.as_ref() else {
            return DispatchOutcome::Ignored;
        };

        let Some(record) = notification.record() else {
            warn!("Ignoring {} notification without a record", notification.kind);
            return DispatchOutcome::Ignored;
        };

        let path = record.path().to_string();
        if !is_safe_relative_path(&path) {
            warn!("Ignoring {} for unsafe path {:?}", notification.kind, path);
            return DispatchOutcome::Ignored;
        }

        let outcome = match notification.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                self.echo.mark(&path);
                match remote.client.download(&record.id).await {
                    Some(content) => self.write_if_changed(&path, &content).await,
                    None => DispatchOutcome::Failed(path),
                }
            }
            ChangeKind::Delete => {
                self.echo.mark(&path);
                match self.fs.delete(&path).await {
                    Ok(()) => {
                        info!("Removed {} (deleted remotely)", path);
                        DispatchOutcome::Removed(path)
                    }
                    Err(FsError::NotFound(_)) => {
                        debug!("{} already absent locally", path);
                        DispatchOutcome::Absent(path)
                    }
                    Err(e) => {
                        error!("Failed to remove {}: {}", path, e);
                        DispatchOutcome::Failed(path)
                    }
                }
            }
        };

        match &outcome {
            DispatchOutcome::Failed(_) => self.status.record_error(),
            _ => self.status.record_sync(),
        }
        outcome
    }

    async fn write_if_changed(&self, path: &str, content: &str) -> DispatchOutcome {
        if let Ok(existing) = self.fs.read(path).await {
            if existing == content.as_bytes() {
                debug!("{} already up to date", path);
                return DispatchOutcome::Unchanged(path.to_string());
            }
        }

        match self.fs.write(path, content.as_bytes()).await {
            Ok(()) => {
                info!("Wrote {} ({} bytes from remote)", path, content.len());
                DispatchOutcome::Written(path.to_string())
            }
            Err(e) => {
                error!("Failed to write {}: {}", path, e);
                DispatchOutcome::Failed(path.to_string())
            }
        }
    }
}
