use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;
const MAX_QUEUE_PER_JOB: usize = 100;
/// How long a finished job's history stays available for replay.
const FINISHED_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

/// Fan-out of `job:*` events to WebSocket clients, with a short per-job
/// history so a client that connects late can replay what it missed.
#[derive(Clone)]
pub struct JobEvents {
    tx: broadcast::Sender<String>,
    queue: Arc<DashMap<String, VecDeque<QueuedMessage>>>,
    retention: Duration,
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEvents {
    pub fn new() -> Self {
        Self::with_retention(FINISHED_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            queue: Arc::new(DashMap::new()),
            retention,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event_type: &str, payload: Value) {
        let msg = serde_json::json!({
            "type": event_type,
            "payload": payload,
        });

        if let Some(job_id) = payload.get("jobId").and_then(|v| v.as_str()) {
            let mut entry = self.queue.entry(job_id.to_string()).or_default();
            entry.push_back(QueuedMessage {
                event_type: event_type.to_string(),
                payload: payload.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            if entry.len() > MAX_QUEUE_PER_JOB {
                entry.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(msg.to_string());
    }

    pub fn queued(&self, job_id: &str, since: i64) -> Vec<QueuedMessage> {
        self.queue
            .get(job_id)
            .map(|q| q.iter().filter(|m| m.timestamp > since).cloned().collect())
            .unwrap_or_default()
    }

    pub fn forget(&self, job_id: &str) {
        self.queue.remove(job_id);
    }

    /// Drops a finished job's history once the retention period has passed.
    pub fn retire(&self, job_id: &str) {
        let queue = self.queue.clone();
        let retention = self.retention;
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            queue.remove(&job_id);
        });
    }

    pub fn tracked_jobs(&self) -> usize {
        self.queue.len()
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();
    let (replay_tx, mut replay_rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Event subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(m) = replay_rx.recv() => m,
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // replay:request {jobId, since} answers this client only
    let events = state.events.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if parsed.get("type").and_then(|t| t.as_str()) != Some("replay:request") {
                continue;
            }
            let Some(payload) = parsed.get("payload") else { continue };
            let job_id = payload.get("jobId").and_then(|v| v.as_str()).unwrap_or("");
            let since = payload.get("since").and_then(|v| v.as_i64()).unwrap_or(0);
            for m in events.queued(job_id, since) {
                let replay = serde_json::json!({
                    "type": m.event_type,
                    "payload": m.payload,
                });
                if replay_tx.send(replay.to_string()).is_err() {
                    return;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
