//! SyncEngine: ties the watched folder to the remote store.
//!
//! The engine's behavior is split across modules by direction:
//! - `reconcile` - startup catch-up from the remote store
//! - `dispatch` - remote change notifications applied to the folder
//! - `upload` - local file events pushed to the remote store
//!
//! All operations take `&self`, so one engine can be shared behind `Arc` by
//! the tasks that drive each direction.

use std::sync::Arc;

use crate::client::SyncClient;
use crate::document::WatchFilter;
use crate::echo::EchoSuppressor;
use crate::fs::FileSystem;
use crate::remote::{NotificationStream, RemoteStore};
use crate::status::SyncStatus;

/// Settings that do not change while the engine runs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Display name recorded as author in provenance and `updated_by`
    pub user: String,
    pub filter: WatchFilter,
}

pub(crate) struct Remote<S: RemoteStore> {
    pub(crate) client: SyncClient<S>,
    pub(crate) workspace_id: String,
}

pub struct SyncEngine<F: FileSystem, S: RemoteStore> {
    pub(crate) fs: F,
    pub(crate) remote: Option<Remote<S>>,
    pub(crate) echo: Arc<EchoSuppressor>,
    pub(crate) settings: EngineSettings,
    pub(crate) status: Arc<SyncStatus>,
}

impl<F: FileSystem, S: RemoteStore> SyncEngine<F, S> {
    /// Engine without a remote: local events are only logged.
    pub fn new(fs: F, echo: Arc<EchoSuppressor>, settings: EngineSettings) -> Self {
        Self {
            fs,
            remote: None,
            echo,
            settings,
            status: Arc::new(SyncStatus::new()),
        }
    }

    /// Attach the remote store and the workspace every operation is scoped to.
    pub fn with_remote(mut self, store: S, workspace_id: impl Into<String>) -> Self {
        self.remote = Some(Remote {
            client: SyncClient::new(store),
            workspace_id: workspace_id.into(),
        });
        self
    }

    pub fn is_local_only(&self) -> bool {
        self.remote.is_none()
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.workspace_id.as_str())
    }

    pub fn client(&self) -> Option<&SyncClient<S>> {
        self.remote.as_ref().map(|r| &r.client)
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn echo(&self) -> &Arc<EchoSuppressor> {
        &self.echo
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    /// Open the workspace's change stream; `None` in local-only mode or when
    /// the channel is unavailable.
    pub async fn subscribe(&self) -> Option<NotificationStream> {
        let remote = self.remote.as_ref()?;
        remote.client.subscribe(&remote.workspace_id).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::document::{DocumentRecord, filename_of, group_of, mime_type_for, storage_key};
    use crate::fs::InMemoryFs;
    use crate::memory_store::InMemoryStore;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    pub(crate) type TestEngine = SyncEngine<Arc<InMemoryFs>, Arc<InMemoryStore>>;

    pub(crate) fn settings() -> EngineSettings {
        EngineSettings {
            user: "Alice".into(),
            filter: WatchFilter::new([".md", ".txt"], 1024),
        }
    }

    /// Engine over fresh in-memory doubles, returning handles to both.
    pub(crate) fn engine() -> (TestEngine, Arc<InMemoryFs>, Arc<InMemoryStore>) {
        let fs = Arc::new(InMemoryFs::new());
        let store = Arc::new(InMemoryStore::new());
        let echo = Arc::new(EchoSuppressor::new(Duration::from_secs(3)));
        let engine = SyncEngine::new(fs.clone(), echo, settings()).with_remote(store.clone(), "ws");
        (engine, fs, store)
    }

    /// A record as another replica would have written it.
    pub(crate) fn remote_record(
        id: &str,
        path: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> DocumentRecord {
        let filename = filename_of(path).to_string();
        let group = group_of(path).map(str::to_string);
        DocumentRecord {
            id: id.into(),
            storage_path: Some(storage_key("ws", group.as_deref(), &filename)),
            mime_type: mime_type_for(&filename).into(),
            filename,
            original_path: Some(path.into()),
            content: content.into(),
            size: content.len() as u64,
            workspace_id: "ws".into(),
            group,
            tags: Vec::new(),
            updated_at,
            last_editor: Some("Bob".into()),
        }
    }
}
