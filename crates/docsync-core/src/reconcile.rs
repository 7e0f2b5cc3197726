//! Startup reconciliation: bring the local folder up to date with the remote
//! store before either live loop starts.

use tracing::{debug, error, info, warn};

use crate::document::{RecordSummary, is_safe_relative_path};
use crate::engine::SyncEngine;
use crate::fs::{FileSystem, FsError};
use crate::remote::RemoteStore;

/// Report from reconciliation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Remote documents found in the workspace
    pub listed: usize,
    /// Paths written locally
    pub downloaded: Vec<String>,
    /// Paths whose local copy was current (or that were unsafe to write)
    pub skipped: Vec<String>,
    /// Paths that could not be downloaded or written
    pub failed: Vec<String>,
}

impl ReconcileReport {
    /// Check if any local file changed
    pub fn has_changes(&self) -> bool {
        !self.downloaded.is_empty()
    }
}

impl<F: FileSystem, S: RemoteStore> SyncEngine<F, S> {
    /// Download every remote document that is missing locally or newer than
    /// the local copy.
    ///
    /// Last write wins by timestamp: a local file is replaced only when the
    /// remote `updated_at` is strictly later than its mtime. Failures are
    /// counted and skipped.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(remote) = self.remote.as_ref() else {
            debug!("Local-only mode, skipping reconciliation");
            return report;
        };

        let summaries = remote.client.list(&remote.workspace_id).await;
        report.listed = summaries.len();
        info!("Found {} existing files", summaries.len());

        for summary in &summaries {
            let path = summary.path();

            if !is_safe_relative_path(path) {
                warn!("Refusing to write remote path {:?}", path);
                report.skipped.push(path.to_string());
                continue;
            }

            if !self.needs_download(summary).await {
                debug!("Local copy of {} is current", path);
                report.skipped.push(path.to_string());
                continue;
            }

            self.echo.mark(path);
            let Some(content) = remote.client.download(&summary.id).await else {
                self.status.record_error();
                report.failed.push(path.to_string());
                continue;
            };

            match self.fs.write(path, content.as_bytes()).await {
                Ok(()) => {
                    info!("Downloaded {}", path);
                    report.downloaded.push(path.to_string());
                }
                Err(e) => {
                    error!("Failed to write {}: {}", path, e);
                    self.status.record_error();
                    report.failed.push(path.to_string());
                }
            }
        }

        self.status.record_sync();
        info!(
            "Reconciled: {} downloaded, {} up to date, {} failed",
            report.downloaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn needs_download(&self, summary: &RecordSummary) -> bool {
        match self.fs.stat(summary.path()).await {
            Ok(stat) => summary.updated_at.timestamp_millis() > stat.mtime_millis,
            Err(FsError::NotFound(_)) => true,
            Err(e) => {
                // Unknown local state; prefer the remote copy
                warn!("Could not stat {}: {}", summary.path(), e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::*;
    use crate::fs::FileSystem;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_empty_workspace_downloads_nothing() {
        let (engine, fs, _store) = engine();

        let report = engine.reconcile().await;

        assert_eq!(report.listed, 0);
        assert!(!report.has_changes());
        assert!(fs.paths().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_file_is_downloaded() {
        let (engine, fs, store) = engine();
        store.seed(remote_record("r1", "q3/report.md", "# Q3", Utc::now()), "# Q3");

        let report = engine.reconcile().await;

        assert_eq!(report.downloaded, vec!["q3/report.md".to_string()]);
        assert_eq!(fs.contents("q3/report.md").as_deref(), Some("# Q3"));
        assert!(engine.echo().is_suppressed("q3/report.md"));
        assert!(engine.status().snapshot().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_newer_local_file_is_kept() {
        let (engine, fs, store) = engine();
        let remote_time = Utc::now() - Duration::hours(1);
        store.seed(remote_record("r1", "a.md", "remote", remote_time), "remote");
        fs.write("a.md", b"local edit").await.unwrap();

        let report = engine.reconcile().await;

        assert_eq!(report.skipped, vec!["a.md".to_string()]);
        assert_eq!(fs.contents("a.md").as_deref(), Some("local edit"));
    }

    #[tokio::test]
    async fn test_older_local_file_is_replaced() {
        let (engine, fs, store) = engine();
        store.seed(remote_record("r1", "a.md", "remote", Utc::now()), "remote");
        fs.write("a.md", b"stale").await.unwrap();
        fs.set_mtime("a.md", (Utc::now() - Duration::days(1)).timestamp_millis());

        engine.reconcile().await;

        assert_eq!(fs.contents("a.md").as_deref(), Some("remote"));
    }

    #[tokio::test]
    async fn test_unsafe_remote_paths_are_skipped() {
        let (engine, fs, store) = engine();
        store.seed(remote_record("r1", "a.md", "a", Utc::now()), "a");
        store.seed(remote_record("r2", "../escape.md", "x", Utc::now()), "x");
        store.seed(remote_record("r3", "b.md", "b", Utc::now()), "b");

        let report = engine.reconcile().await;

        assert_eq!(report.listed, 3);
        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(report.skipped, vec!["../escape.md".to_string()]);
        assert_eq!(fs.paths(), vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[tokio::test]
    async fn test_download_failures_are_counted() {
        let (engine, fs, store) = engine();
        store.seed(remote_record("r1", "a.md", "a", Utc::now()), "a");
        store.set_fail_record_reads(true);

        let report = engine.reconcile().await;

        assert_eq!(report.failed, vec!["a.md".to_string()]);
        assert!(fs.paths().is_empty());
        assert_eq!(engine.status().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_one_failed_download_does_not_block_the_rest() {
        let (engine, fs, store) = engine();
        let now = Utc::now();
        store.seed(remote_record("r1", "a.md", "a", now - Duration::minutes(3)), "a");
        store.seed(remote_record("r2", "b.md", "b", now - Duration::minutes(2)), "b");
        store.seed(remote_record("r3", "c.md", "c", now - Duration::minutes(1)), "c");
        store.fail_record("r2");

        let report = engine.reconcile().await;

        assert_eq!(report.listed, 3);
        assert_eq!(report.failed, vec!["b.md".to_string()]);
        let mut downloaded = report.downloaded.clone();
        downloaded.sort();
        assert_eq!(downloaded, vec!["a.md".to_string(), "c.md".to_string()]);
        assert_eq!(fs.contents("a.md").as_deref(), Some("a"));
        assert_eq!(fs.contents("c.md").as_deref(), Some("c"));
        assert_eq!(fs.contents("b.md"), None);
        assert_eq!(engine.status().snapshot().errors, 1);
    }
}
