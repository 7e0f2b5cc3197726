//! HostedStore: RemoteStore over the hosted service's HTTP APIs.
//!
//! - Records live in the `files` table behind the REST endpoint
//!   (`/rest/v1/files`), activity in `file_events`.
//! - Blobs live in an object storage bucket (`/storage/v1/object/<bucket>/<key>`).
//! - Change notifications come from the realtime websocket (see `realtime`).
//!
//! Delete notifications only carry the full row when the `files` table uses
//! `REPLICA IDENTITY FULL`; otherwise remote deletes are not applied locally.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsync_core::remote::{ActivityKind, NotificationStream, RemoteStore, Result, StoreError};
use docsync_core::{Document, DocumentRecord, RecordSummary};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::realtime::{self, ReconnectConfig};

const RECORDS_TABLE: &str = "files";
const ACTIVITY_TABLE: &str = "file_events";
const SUMMARY_COLUMNS: &str = "id,filename,original_path,updated_at,file_size";

/// Row written on insert and update.
#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    filename: &'a str,
    original_path: &'a str,
    content: &'a str,
    file_size: u64,
    mime_type: &'a str,
    storage_path: &'a str,
    workspace_id: &'a str,
    sprint_folder: Option<&'a str>,
    tags: &'a [String],
    updated_at: DateTime<Utc>,
    updated_by: &'a str,
}

impl<'a> RecordRow<'a> {
    fn new(doc: &'a Document, storage_path: &'a str) -> Self {
        Self {
            filename: &doc.filename,
            original_path: &doc.path,
            content: &doc.content,
            file_size: doc.size,
            mime_type: &doc.mime_type,
            storage_path,
            workspace_id: &doc.workspace_id,
            sprint_folder: doc.group.as_deref(),
            tags: &doc.tags,
            updated_at: doc.modified_at,
            updated_by: &doc.last_editor,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActivityRow<'a> {
    file_id: &'a str,
    event_type: &'a str,
    workspace_id: &'a str,
}

pub struct HostedStore {
    http: Client,
    config: RemoteConfig,
    reconnect: ReconnectConfig,
}

impl HostedStore {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            reconnect: ReconnectConfig::default(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url,
            urlencoding::encode(&self.config.bucket),
            encode_key(key)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| StoreError::Transport(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            Err(StoreError::NotFound(format!("{}: {}", what, body)))
        } else {
            Err(StoreError::Storage(format!("{} failed ({}): {}", what, status, body)))
        }
    }

    async fn rows<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Vec<T>> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("{}: {}", what, e)))
    }
}

/// Percent-encode each segment of a blob key, keeping the separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl RemoteStore for HostedStore {
    async fn put_blob(&self, key: &str, content: &[u8], mime_type: &str) -> Result<()> {
        let request = self
            .http
            .post(self.object_url(key))
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(content.to_vec());
        self.send(request, "blob upload").await?;
        debug!("Stored blob {}", key);
        Ok(())
    }

    async fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .send(self.http.get(self.object_url(key)), "blob download")
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(format!("blob download: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn remove_blob(&self, key: &str) -> Result<()> {
        let url = format!(
            "{}/storage/v1/object/{}",
            self.config.url,
            urlencoding::encode(&self.config.bucket)
        );
        let request = self
            .http
            .delete(url)
            .json(&serde_json::json!({ "prefixes": [key] }));
        self.send(request, "blob removal").await?;
        Ok(())
    }

    async fn insert_record(&self, doc: &Document, storage_path: &str) -> Result<DocumentRecord> {
        let request = self
            .http
            .post(self.table_url(RECORDS_TABLE))
            .header("Prefer", "return=representation")
            .json(&RecordRow::new(doc, storage_path));

        self.rows::<DocumentRecord>(request, "record insert")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("record insert returned no rows".into()))
    }

    async fn update_record(&self, id: &str, doc: &Document, storage_path: &str) -> Result<()> {
        let request = self
            .http
            .patch(self.table_url(RECORDS_TABLE))
            .query(&[("id", eq(id))])
            .json(&RecordRow::new(doc, storage_path));
        self.send(request, "record update").await?;
        Ok(())
    }

    async fn find_record(&self, workspace_id: &str, path: &str) -> Result<Option<DocumentRecord>> {
        let request = self.http.get(self.table_url(RECORDS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("workspace_id", eq(workspace_id)),
            ("original_path", eq(path)),
            ("order", "updated_at.desc".to_string()),
            ("limit", "1".to_string()),
        ]);
        Ok(self.rows(request, "record lookup").await?.into_iter().next())
    }

    async fn fetch_record(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let request = self
            .http
            .get(self.table_url(RECORDS_TABLE))
            .query(&[("select", "*".to_string()), ("id", eq(id))]);
        Ok(self.rows(request, "record fetch").await?.into_iter().next())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.table_url(RECORDS_TABLE))
            .query(&[("id", eq(id))]);
        self.send(request, "record delete").await?;
        Ok(())
    }

    async fn list_records(&self, workspace_id: &str) -> Result<Vec<RecordSummary>> {
        let request = self.http.get(self.table_url(RECORDS_TABLE)).query(&[
            ("select", SUMMARY_COLUMNS.to_string()),
            ("workspace_id", eq(workspace_id)),
            ("order", "updated_at.desc".to_string()),
        ]);
        self.rows(request, "record list").await
    }

    async fn record_activity(
        &self,
        record_id: &str,
        workspace_id: &str,
        kind: ActivityKind,
    ) -> Result<()> {
        let request = self.http.post(self.table_url(ACTIVITY_TABLE)).json(&ActivityRow {
            file_id: record_id,
            event_type: kind.as_str(),
            workspace_id,
        });
        self.send(request, "activity insert").await?;
        Ok(())
    }

    async fn subscribe(&self, workspace_id: &str) -> Result<NotificationStream> {
        realtime::subscribe(&self.config, workspace_id, self.reconnect.clone()).await
    }
}
