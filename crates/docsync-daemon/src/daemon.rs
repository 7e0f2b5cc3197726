//! Daemon event loop.
//!
//! Startup order: reconcile, subscribe, then start the watcher. After that a
//! single `select!` loop takes local events and remote notifications and hands
//! each to the ordered executor keyed by path, so both directions for one
//! path apply in the order they were observed.

use anyhow::Result;
use docsync_core::{
    ChangeNotification, FileEvent, NotificationStream, RemoteStore, SyncEngine,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::native_fs::NativeFs;
use crate::ordered::OrderedExecutor;
use crate::watcher::FileWatcher;

/// How long shutdown waits for queued jobs before abandoning them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Daemon<S: RemoteStore + 'static> {
    engine: Arc<SyncEngine<NativeFs, S>>,
    watcher: FileWatcher,
    executor: OrderedExecutor,
}

impl<S: RemoteStore + 'static> Daemon<S> {
    pub fn new(engine: Arc<SyncEngine<NativeFs, S>>, watcher: FileWatcher) -> Self {
        Self {
            engine,
            watcher,
            executor: OrderedExecutor::new(),
        }
    }

    /// Run until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let report = self.engine.reconcile().await;
        if report.has_changes() {
            info!("Downloaded {} file(s) at startup", report.downloaded.len());
        }

        let mut changes = self.engine.subscribe().await;
        if changes.is_none() && !self.engine.is_local_only() {
            warn!("Continuing without remote change notifications");
        }

        let watched = self.watcher.start()?;
        let status = Arc::clone(self.engine.status());
        status.set_files_watched(watched as u64);
        status.set_running(true);

        match self.engine.workspace_id() {
            Some(workspace_id) => {
                info!("Syncing workspace {}. Press Ctrl+C to stop.", workspace_id)
            }
            None => info!("Local-only mode (no WORKSPACE_ID). Press Ctrl+C to stop."),
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(event) = self.watcher.event_rx().recv() => {
                    self.on_local_event(event);
                }

                notification = next_change(&mut changes) => {
                    self.on_remote_change(notification);
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.watcher.stop();
        status.set_running(false);
        if !self.executor.wait_idle(DRAIN_TIMEOUT).await {
            warn!("Abandoning {} in-flight path(s)", self.executor.active());
        }

        let snapshot = status.snapshot();
        info!(
            "Stopped: {} error(s), last sync {}",
            snapshot.errors,
            snapshot
                .last_sync
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into())
        );
        Ok(())
    }

    fn on_local_event(&self, event: FileEvent) {
        debug!("Local {}: {}", event.kind, event.path);
        let engine = Arc::clone(&self.engine);
        let key = event.path.clone();
        self.executor.submit(&key, async move {
            engine.handle_local(&event).await;
        });
    }

    fn on_remote_change(&self, notification: ChangeNotification) {
        let Some(path) = notification.path().map(str::to_string) else {
            warn!("Ignoring {} notification without a record", notification.kind);
            return;
        };
        debug!("Remote {}: {}", notification.kind, path);
        let engine = Arc::clone(&self.engine);
        self.executor.submit(&path, async move {
            engine.apply_remote(&notification).await;
        });
    }
}

/// Next remote change; pending forever once the stream is gone.
async fn next_change(changes: &mut Option<NotificationStream>) -> ChangeNotification {
    loop {
        match changes {
            Some(stream) => match stream.next().await {
                Some(notification) => return notification,
                None => {
                    warn!("Remote change stream ended");
                    *changes = None;
                }
            },
            None => return futures::future::pending().await,
        }
    }
}
