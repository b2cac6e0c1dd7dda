use super::auth::SessionHandle;
use crate::config::RealtimeConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub topic: String,
    pub table: String,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
    pub old_record: serde_json::Value,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Primary key of the affected row. Deletes only carry it in `old_record`.
    pub fn row_id(&self) -> Option<&str> {
        self.record
            .get("id")
            .or_else(|| self.old_record.get("id"))
            .and_then(|v| v.as_str())
    }

    pub fn record_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.record.clone())
            .with_context(|| format!("failed to decode {} record", self.table))
    }
}

/// Events emitted by the change feed connection.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Connected,
    Joined(String),
    Change(ChangeEvent),
    Disconnected(String),
}

/// One `postgres_changes` listener on a channel topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub table: String,
    /// `*`, `INSERT`, `UPDATE` or `DELETE`.
    pub event: &'static str,
    /// Row filter such as `author_id=eq.<uuid>`.
    pub filter: Option<String>,
}

impl Subscription {
    pub fn table(topic: &str, table: &str) -> Self {
        Self {
            topic: topic.to_string(),
            table: table.to_string(),
            event: "*",
            filter: None,
        }
    }

    pub fn on(mut self, event: &'static str) -> Self {
        self.event = event;
        self
    }

    pub fn filter_eq(mut self, column: &str, value: &str) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value));
        self
    }

    fn channel_topic(&self) -> String {
        format!("realtime:{}", self.topic)
    }

    fn join_payload(&self, access_token: &str) -> serde_json::Value {
        let mut change = serde_json::json!({
            "event": self.event,
            "schema": "public",
            "table": self.table,
        });
        if let Some(filter) = &self.filter {
            change["filter"] = serde_json::Value::String(filter.clone());
        }
        serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": access_token,
        })
    }
}

/// Phoenix channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: serde_json::Value,
    #[serde(default)]
    old_record: serde_json::Value,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

pub struct RealtimeClient {
    session: Arc<SessionHandle>,
    ws_url: String,
    anon_key: String,
    config: RealtimeConfig,
}

impl RealtimeClient {
    pub fn new(session: Arc<SessionHandle>, backend_url: &str, anon_key: &str, config: RealtimeConfig) -> Self {
        Self {
            session,
            ws_url: websocket_url(backend_url, anon_key),
            anon_key: anon_key.to_string(),
            config,
        }
    }

    /// Connect and run the change feed loop, reconnecting on failure.
    /// Returns only after repeated authentication failures.
    pub async fn run(&self, subscriptions: Vec<Subscription>, tx: mpsc::Sender<RealtimeEvent>) -> Result<()> {
        let mut consecutive_auth_failures = 0u32;
        loop {
            match self.connect_and_listen(&subscriptions, &tx).await {
                Ok(()) => {
                    consecutive_auth_failures = 0;
                    tracing::warn!("realtime socket closed cleanly, reconnecting...");
                }
                Err(e) => {
                    let err_str = format!("{:#}", e);
                    let is_auth = err_str.contains("401")
                        || err_str.contains("Unauthorized")
                        || err_str.contains("InvalidJWTToken");
                    if is_auth {
                        consecutive_auth_failures += 1;
                        tracing::error!(
                            "realtime auth failure #{}: {:#}",
                            consecutive_auth_failures,
                            e
                        );
                        if consecutive_auth_failures >= self.config.max_auth_failures {
                            tracing::error!("stopping realtime reconnects after repeated auth failures");
                            let _ = tx
                                .send(RealtimeEvent::Disconnected(
                                    "Realtime authentication failed repeatedly. Sign in again.".to_string(),
                                ))
                                .await;
                            return Err(e);
                        }
                    } else {
                        consecutive_auth_failures = 0;
                        tracing::error!("realtime error: {:#}, reconnecting...", e);
                    }
                    let _ = tx.send(RealtimeEvent::Disconnected(err_str)).await;
                }
            }
            let base = if consecutive_auth_failures > 0 {
                self.config.auth_retry_delay_ms
            } else {
                self.config.reconnect_delay_ms
            };
            let jitter = rand::thread_rng().gen_range(0..=base / 4);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }
    }

    async fn connect_and_listen(
        &self,
        subscriptions: &[Subscription],
        tx: &mpsc::Sender<RealtimeEvent>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .context("realtime connection failed")?;
        let (mut write, mut read) = ws_stream.split();
        tracing::debug!("realtime connected");
        let _ = tx.send(RealtimeEvent::Connected).await;

        let mut next_ref = 1u64;
        let mut join_refs = HashSet::new();
        let mut joined_token = self.session.bearer(&self.anon_key);
        for sub in subscriptions {
            join_refs.insert(next_ref.to_string());
            let frame = Frame {
                topic: sub.channel_topic(),
                event: "phx_join".to_string(),
                payload: sub.join_payload(&joined_token),
                msg_ref: Some(next_ref.to_string()),
            };
            next_ref += 1;
            write
                .send(Message::Text(serde_json::to_string(&frame)?))
                .await
                .context("realtime join failed")?;
        }
        tracing::debug!(count = subscriptions.len(), "joined realtime channels");

        let mut heartbeat = tokio::time::interval(Duration::from_secs(self.config.heartbeat_secs));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    let Some(msg) = msg else { break };
                    match msg.context("realtime read error")? {
                        Message::Text(text) => match parse_frame(&text, &join_refs) {
                            Ok(Some(event)) => {
                                let _ = tx.send(event).await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                // Join rejections surface here and end the connection.
                                if format!("{:#}", e).contains("rejected") {
                                    return Err(e);
                                }
                                tracing::warn!("realtime message parse error: {:#}", e);
                            }
                        },
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Message::Close(_) => {
                            tracing::debug!("realtime received close frame");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    let frame = Frame {
                        topic: "phoenix".to_string(),
                        event: "heartbeat".to_string(),
                        payload: serde_json::json!({}),
                        msg_ref: Some(next_ref.to_string()),
                    };
                    next_ref += 1;
                    write
                        .send(Message::Text(serde_json::to_string(&frame)?))
                        .await
                        .context("realtime heartbeat failed")?;

                    // Push a refreshed access token to every joined channel.
                    let token = self.session.bearer(&self.anon_key);
                    if token != joined_token {
                        for sub in subscriptions {
                            let frame = Frame {
                                topic: sub.channel_topic(),
                                event: "access_token".to_string(),
                                payload: serde_json::json!({ "access_token": token }),
                                msg_ref: Some(next_ref.to_string()),
                            };
                            next_ref += 1;
                            write.send(Message::Text(serde_json::to_string(&frame)?)).await?;
                        }
                        tracing::debug!("realtime access token rotated");
                        joined_token = token;
                    }
                }
            }
        }

        Ok(())
    }
}

/// `http(s)://host` -> `ws(s)://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn websocket_url(backend_url: &str, anon_key: &str) -> String {
    let base = backend_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", base, anon_key)
}

/// Decode one text frame. Only replies whose ref is in `join_refs` count as
/// joins; heartbeat and token-push replies and presence traffic yield `None`.
fn parse_frame(text: &str, join_refs: &HashSet<String>) -> Result<Option<RealtimeEvent>> {
    let frame: Frame = serde_json::from_str(text).context("failed to parse realtime frame")?;
    let topic = frame
        .topic
        .strip_prefix("realtime:")
        .unwrap_or(&frame.topic)
        .to_string();

    match frame.event.as_str() {
        "postgres_changes" => {
            let data: ChangeData = serde_json::from_value(
                frame.payload.get("data").cloned().unwrap_or_default(),
            )
            .context("failed to parse change payload")?;
            Ok(Some(RealtimeEvent::Change(ChangeEvent {
                topic,
                table: data.table,
                kind: data.kind,
                record: data.record,
                old_record: data.old_record,
                commit_timestamp: data.commit_timestamp,
            })))
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str()).unwrap_or("");
            let is_join = frame.msg_ref.as_ref().is_some_and(|r| join_refs.contains(r));
            match (is_join, status) {
                (true, "ok") => Ok(Some(RealtimeEvent::Joined(topic))),
                (true, _) => anyhow::bail!("channel {} join rejected: {}", topic, frame.payload["response"]),
                (false, "ok") => Ok(None),
                (false, _) => {
                    tracing::warn!(topic, "realtime push refused: {}", frame.payload["response"]);
                    Ok(None)
                }
            }
        }
        "system" => {
            if frame.payload.get("status").and_then(|s| s.as_str()) == Some("error") {
                tracing::warn!(topic, "realtime system error: {}", frame.payload);
            }
            Ok(None)
        }
        "phx_error" | "phx_close" => {
            tracing::warn!(topic, event = frame.event, "realtime channel closed");
            Ok(None)
        }
        _ => {
            tracing::trace!(event = frame.event, "unhandled realtime event");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("https://demo.example.co/", "anon"),
            "wss://demo.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert!(websocket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn test_join_payload_carries_filter_and_token() {
        let sub = Subscription::table("my-posts", "posts").filter_eq("author_id", "u1");
        let payload = sub.join_payload("tok");
        assert_eq!(payload["access_token"], "tok");
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "posts");
        assert_eq!(change["event"], "*");
        assert_eq!(change["filter"], "author_id=eq.u1");
        assert_eq!(sub.channel_topic(), "realtime:my-posts");
    }

    #[test]
    fn test_parse_update_change() {
        let text = r#"{
            "topic": "realtime:feed",
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "posts",
                    "commit_timestamp": "2024-03-01T10:00:00Z",
                    "type": "UPDATE",
                    "record": {"id": "p1", "title": "New"},
                    "old_record": {"id": "p1"},
                    "errors": null
                }
            },
            "ref": null
        }"#;
        match parse_frame(text, &HashSet::new()).unwrap() {
            Some(RealtimeEvent::Change(change)) => {
                assert_eq!(change.topic, "feed");
                assert_eq!(change.kind, ChangeKind::Update);
                assert_eq!(change.row_id(), Some("p1"));
                assert!(change.commit_timestamp.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delete_row_id_comes_from_old_record() {
        let text = r#"{"topic":"realtime:feed","event":"postgres_changes","payload":{"data":{
            "table":"posts","type":"DELETE","record":{},"old_record":{"id":"p9"}}},"ref":null}"#;
        let Some(RealtimeEvent::Change(change)) = parse_frame(text, &HashSet::new()).unwrap() else {
            panic!("expected change");
        };
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row_id(), Some("p9"));
    }

    #[test]
    fn test_join_reply() {
        let joins = HashSet::from(["1".to_string()]);
        let ok = r#"{"topic":"realtime:feed","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert!(matches!(parse_frame(ok, &joins).unwrap(), Some(RealtimeEvent::Joined(t)) if t == "feed"));

        let heartbeat = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"5"}"#;
        assert!(parse_frame(heartbeat, &joins).unwrap().is_none());

        let rejected = r#"{"topic":"realtime:feed","event":"phx_reply","payload":{"status":"error","response":{"reason":"Unauthorized"}},"ref":"1"}"#;
        let err = parse_frame(rejected, &joins).unwrap_err();
        assert!(format!("{:#}", err).contains("Unauthorized"));
    }

    #[test]
    fn test_token_push_reply_is_not_a_join() {
        let joins = HashSet::from(["1".to_string(), "2".to_string()]);
        let pushed = r#"{"topic":"realtime:feed","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"7"}"#;
        assert!(parse_frame(pushed, &joins).unwrap().is_none());

        let refused = r#"{"topic":"realtime:feed","event":"phx_reply","payload":{"status":"error","response":{"reason":"expired"}},"ref":"8"}"#;
        assert!(parse_frame(refused, &joins).unwrap().is_none());
    }
}
