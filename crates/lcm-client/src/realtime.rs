//! Change feed over the realtime websocket.
//!
//! One listener task per subscription joins the table's channel, keeps the
//! connection alive with heartbeats and reconnects until unsubscribed.
//! Unsubscribing signals the task, which leaves the channel and exits.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use lcm_core::models::RecordKey;
use lcm_core::service::{ChangeEvent, ChangeKind, Subscription, SubscriptionGuard};
use lcm_core::SyncError;
use lcm_proto::{ChangeType, PhoenixMessage, PHX_CLOSE, PHX_ERROR};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeOptions {
    /// Delay before reconnecting a dropped connection
    pub reconnect: Duration,
    pub heartbeat: Duration,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(5),
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Websocket endpoint for a service base URL
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<String, SyncError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| SyncError::validation(format!("invalid service url '{base_url}': {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::validation(format!("cannot derive websocket url from '{base_url}'")))?;
    let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url.to_string())
}

/// Start listening for changes to `table`. Unsubscribing stops the listener.
pub fn subscribe(
    ws_url: String,
    table: &str,
    access_token: String,
    options: RealtimeOptions,
) -> Subscription {
    let (tx, rx) = unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(run_listener(
        ws_url,
        table.to_string(),
        access_token,
        options,
        tx,
        stop_rx,
    ));
    let guard = SubscriptionGuard::new(move || {
        let _ = stop_tx.send(());
    });
    Subscription::new(rx, guard)
}

async fn run_listener(
    ws_url: String,
    table: String,
    access_token: String,
    options: RealtimeOptions,
    tx: UnboundedSender<ChangeEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        match listen_once(&ws_url, &table, &access_token, &options, &tx, &mut stop).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => warn!(table = %table, "realtime listener error: {e:#}"),
        }
        if tx.is_closed() {
            break;
        }
        tokio::select! {
            _ = sleep(options.reconnect) => {}
            _ = &mut stop => break,
        }
        debug!(table = %table, "reconnecting realtime listener");
    }
    debug!(table = %table, "realtime listener stopped");
}

/// One connection's lifetime. Returns true once the subscriber is gone.
async fn listen_once(
    ws_url: &str,
    table: &str,
    access_token: &str,
    options: &RealtimeOptions,
    tx: &UnboundedSender<ChangeEvent>,
    stop: &mut oneshot::Receiver<()>,
) -> Result<bool> {
    let (ws, _) = tokio::select! {
        connected = connect_async(ws_url) => {
            connected.context("Failed to connect to realtime service")?
        }
        _ = &mut *stop => return Ok(true),
    };
    let (mut write, mut read) = ws.split();

    let mut reference = 1u64;
    let join = PhoenixMessage::join(table, reference, Some(access_token));
    write
        .send(Message::Text(
            serde_json::to_string(&join).context("Failed to serialize join frame")?,
        ))
        .await
        .context("Failed to join realtime channel")?;
    info!(table, "joined realtime channel");

    let mut heartbeat = interval(options.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                reference += 1;
                let frame = serde_json::to_string(&PhoenixMessage::heartbeat(reference))
                    .context("Failed to serialize heartbeat")?;
                write
                    .send(Message::Text(frame))
                    .await
                    .context("Failed to send heartbeat")?;
            }
            _ = &mut *stop => break,
            _ = tx.closed() => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !forward_frame(table, &text, tx)? {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(false),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Realtime websocket error"),
            }
        }
    }

    reference += 1;
    let leave = serde_json::to_string(&PhoenixMessage::leave(table, reference))
        .context("Failed to serialize leave frame")?;
    if let Err(e) = write.send(Message::Text(leave)).await {
        debug!(table, "could not send leave frame: {e}");
    }
    info!(table, "left realtime channel");
    Ok(true)
}

/// Forward a text frame's change, if any. Returns false once nobody listens.
fn forward_frame(table: &str, text: &str, tx: &UnboundedSender<ChangeEvent>) -> Result<bool> {
    let frame = match serde_json::from_str::<PhoenixMessage>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("ignoring undecodable realtime frame: {e}");
            return Ok(true);
        }
    };
    if frame.event == PHX_ERROR || frame.event == PHX_CLOSE {
        anyhow::bail!("realtime channel closed by server ({})", frame.event);
    }
    if frame.reply_status() == Some("error") {
        warn!(table, payload = %frame.payload, "realtime join rejected");
    }
    match change_event(table, &frame) {
        Some(event) => Ok(tx.send(event).is_ok()),
        None => Ok(true),
    }
}

/// Translate a frame into a change notification for `table`
pub fn change_event(table: &str, frame: &PhoenixMessage) -> Option<ChangeEvent> {
    let change = frame.postgres_change()?;
    if change.table != table {
        return None;
    }
    let kind = match change.change_type {
        ChangeType::Insert => ChangeKind::Insert,
        ChangeType::Update => ChangeKind::Update,
        ChangeType::Delete => ChangeKind::Delete,
    };
    Some(ChangeEvent {
        collection: table.to_string(),
        kind,
        key: change.row_id().and_then(RecordKey::from_value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::timeout;

    #[test]
    fn websocket_url_swaps_scheme() {
        assert_eq!(
            websocket_url("https://abc.supabase.co", "anon").unwrap(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(
            websocket_url("http://127.0.0.1:54321/", "k").unwrap(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn change_frames_become_events() {
        let frame = PhoenixMessage {
            topic: PhoenixMessage::topic_for("faqs"),
            event: "postgres_changes".into(),
            payload: json!({
                "data": {
                    "schema": "public",
                    "table": "faqs",
                    "type": "UPDATE",
                    "record": { "id": 3, "order": 1 },
                    "old_record": { "id": 3 }
                }
            }),
            reference: None,
        };
        assert_eq!(
            change_event("faqs", &frame),
            Some(ChangeEvent {
                collection: "faqs".into(),
                kind: ChangeKind::Update,
                key: Some(RecordKey::Int(3)),
            })
        );
        assert_eq!(change_event("projects", &frame), None);
        assert_eq!(change_event("faqs", &PhoenixMessage::heartbeat(1)), None);
    }

    #[tokio::test]
    async fn unsubscribing_leaves_the_channel() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (joined_tx, joined_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut joined_tx = Some(joined_tx);
            let mut frames = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let frame: PhoenixMessage = serde_json::from_str(&text).unwrap();
                    frames.push((frame.event.clone(), frame.topic.clone()));
                    if frame.event == lcm_proto::PHX_JOIN {
                        if let Some(joined) = joined_tx.take() {
                            let _ = joined.send(());
                        }
                    }
                    if frame.event == lcm_proto::PHX_LEAVE {
                        break;
                    }
                }
            }
            frames
        });

        let mut subscription = subscribe(
            format!("ws://{addr}/realtime/v1/websocket"),
            "faqs",
            "anon".into(),
            RealtimeOptions::default(),
        );
        timeout(Duration::from_secs(2), joined_rx)
            .await
            .expect("listener should join")
            .unwrap();
        subscription.unsubscribe();

        let frames = timeout(Duration::from_secs(2), server)
            .await
            .expect("leave frame should arrive")
            .unwrap();
        let topic = PhoenixMessage::topic_for("faqs");
        assert_eq!(
            frames,
            vec![
                (lcm_proto::PHX_JOIN.to_string(), topic.clone()),
                (lcm_proto::PHX_LEAVE.to_string(), topic),
            ]
        );
        let next = timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("feed should close");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn unsubscribing_closes_the_feed() {
        // nothing listens on this port; the listener keeps retrying until stopped
        let options = RealtimeOptions {
            reconnect: Duration::from_millis(10),
            heartbeat: Duration::from_secs(30),
        };
        let mut subscription = subscribe(
            "ws://127.0.0.1:9/realtime/v1/websocket".into(),
            "faqs",
            "anon".into(),
            options,
        );
        subscription.unsubscribe();
        let next = timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("feed should close");
        assert!(next.is_none());
    }
}
