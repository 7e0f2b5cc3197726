//! Realtime change channel over WebSocket.
//!
//! Speaks the phoenix-channel framing used by the hosted store: one join for
//! the `files` table filtered to the workspace, a heartbeat every 30 seconds,
//! and `postgres_changes` frames carrying `{type, record, old_record}`.
//!
//! The connection is kept alive by a background task that reconnects with
//! exponential backoff. Changes made while disconnected are not replayed.

use docsync_core::DocumentRecord;
use docsync_core::notification::{ChangeKind, ChangeNotification};
use docsync_core::remote::{NotificationStream, StoreError};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::RemoteConfig;

pub const CHANNEL_TOPIC: &str = "realtime:file-changes";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(ChangeNotification),
    /// Reply to a join or heartbeat
    Reply { ok: bool, detail: String },
    /// Server closed or errored the channel
    ChannelError(String),
    /// Presence, system messages and anything else we do not act on
    Other,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Decode one text frame.
///
/// Change frames with an unknown kind are rejected. A record that does not
/// decode (for example a delete's `old_record` carrying only the primary
/// key) is passed on as absent.
pub fn decode_frame(text: &str) -> Result<Frame, StoreError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| StoreError::Decode(format!("frame: {}", e)))?;

    match raw.event.as_str() {
        "postgres_changes" => {
            let data = raw.payload.get("data").cloned().unwrap_or(raw.payload);
            let change: RawChange = serde_json::from_value(data)
                .map_err(|e| StoreError::Decode(format!("change payload: {}", e)))?;
            let kind: ChangeKind = change
                .kind
                .parse()
                .map_err(|e: docsync_core::notification::UnknownChangeKind| {
                    StoreError::Decode(e.to_string())
                })?;

            Ok(Frame::Change(ChangeNotification {
                kind,
                before: change.old_record.and_then(decode_record),
                after: change.record.and_then(decode_record),
            }))
        }
        "phx_reply" => {
            let ok = raw.payload.get("status").and_then(Value::as_str) == Some("ok");
            let detail = raw
                .payload
                .get("response")
                .map(Value::to_string)
                .unwrap_or_default();
            Ok(Frame::Reply { ok, detail })
        }
        "phx_error" | "phx_close" => Ok(Frame::ChannelError(raw.event)),
        _ => Ok(Frame::Other),
    }
}

fn decode_record(value: Value) -> Option<DocumentRecord> {
    if value.as_object().is_none_or(|fields| fields.is_empty()) {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!("Partial record in change payload: {}", e);
            None
        }
    }
}

/// WebSocket endpoint for a base URL (`https` becomes `wss`).
pub fn socket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        base,
        urlencoding::encode(api_key)
    )
}

pub fn join_message(workspace_id: &str, access_token: &str, msg_ref: u64) -> String {
    json!({
        "topic": CHANNEL_TOPIC,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "files",
                    "filter": format!("workspace_id=eq.{}", workspace_id),
                }]
            },
            "access_token": access_token,
        },
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

pub fn heartbeat_message(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

enum SessionEnd {
    /// Connection dropped; reconnect
    Disconnected,
    /// Nobody is listening anymore
    ReceiverGone,
}

/// Open the channel for a workspace.
///
/// The first connection is made before returning, so an unreachable server
/// surfaces as `StoreError::Transport`. Later drops are retried in the
/// background until the returned stream is dropped.
pub async fn subscribe(
    remote: &RemoteConfig,
    workspace_id: &str,
    reconnect: ReconnectConfig,
) -> Result<NotificationStream, StoreError> {
    let url = socket_url(&remote.url, &remote.anon_key);
    let first = open(&url, workspace_id, &remote.anon_key).await?;
    info!("Realtime channel joined for workspace {}", workspace_id);

    let (tx, rx) = mpsc::unbounded();
    let workspace_id = workspace_id.to_string();
    let access_token = remote.anon_key.clone();

    tokio::spawn(async move {
        let mut next = Some(first);
        let mut attempt = 0u32;

        loop {
            let ws = match next.take() {
                Some(ws) => ws,
                None => {
                    attempt += 1;
                    let delay = calculate_backoff(attempt, &reconnect);
                    debug!("Reconnecting realtime channel in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    if tx.is_closed() {
                        return;
                    }
                    match open(&url, &workspace_id, &access_token).await {
                        Ok(ws) => {
                            info!("Realtime channel reconnected");
                            attempt = 0;
                            ws
                        }
                        Err(e) => {
                            warn!("Realtime reconnect failed (attempt {}): {}", attempt, e);
                            continue;
                        }
                    }
                }
            };

            match run_session(ws, &tx).await {
                SessionEnd::ReceiverGone => {
                    debug!("Realtime stream dropped, closing channel");
                    return;
                }
                SessionEnd::Disconnected => {
                    warn!("Realtime connection lost");
                }
            }
        }
    });

    Ok(rx.boxed())
}

async fn open(url: &str, workspace_id: &str, access_token: &str) -> Result<WsStream, StoreError> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;

    ws.send(Message::Text(join_message(workspace_id, access_token, 1)))
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    Ok(ws)
}

async fn run_session(ws: WsStream, tx: &mpsc::UnboundedSender<ChangeNotification>) -> SessionEnd {
    let (mut write, mut read) = ws.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // First tick completes immediately
    heartbeat.tick().await;
    let mut msg_ref = 1u64;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if tx.is_closed() {
                    return SessionEnd::ReceiverGone;
                }
                msg_ref += 1;
                if let Err(e) = write.send(Message::Text(heartbeat_message(msg_ref))).await {
                    warn!("Failed to send heartbeat: {}", e);
                    return SessionEnd::Disconnected;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(Frame::Change(notification)) => {
                            debug!("Realtime {} for {:?}", notification.kind, notification.path());
                            if tx.unbounded_send(notification).is_err() {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                        Ok(Frame::Reply { ok: false, detail }) => {
                            error!("Realtime channel rejected request: {}", detail);
                        }
                        Ok(Frame::ChannelError(event)) => {
                            warn!("Realtime channel reported {}", event);
                            return SessionEnd::Disconnected;
                        }
                        Ok(Frame::Reply { .. }) | Ok(Frame::Other) => {}
                        Err(e) => warn!("Dropping realtime frame: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        return SessionEnd::Disconnected;
                    }
                }
            }
        }
    }
}
