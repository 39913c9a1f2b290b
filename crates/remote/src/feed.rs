//! Push-channel client: a per-user WebSocket subscription to job-row
//! changes.
//!
//! [`ChangeFeed::start`] spawns a long-lived task that connects to the
//! realtime endpoint, subscribes to the signed-in user's `generations`
//! rows, parses incoming frames, and broadcasts [`ChangeEvent`]s.  The
//! connection automatically re-establishes itself with exponential
//! backoff; the feed has no lifetime ceiling -- it is torn down only at
//! [`ChangeFeed::shutdown`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tokio_util::sync::CancellationToken;

use stagex_core::types::UserId;

use crate::changes::{parse_frame, ChangeEvent, TABLE_GENERATIONS};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Broadcast channel capacity for change events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration handle for the realtime subscription.
pub struct ChangeFeedClient {
    user_id: UserId,
    ws_url: String,
    api_key: String,
}

/// A live WebSocket subscription.
pub struct ChangeFeedConnection {
    /// Unique client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl ChangeFeedClient {
    /// Create a client scoped to one user's rows.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `wss://platform.example`.
    pub fn new(user_id: UserId, ws_url: String, api_key: String) -> Self {
        Self {
            user_id,
            ws_url,
            api_key,
        }
    }

    /// The user whose rows this subscription covers.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// WebSocket base URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the realtime endpoint and subscribe.
    ///
    /// Generates a unique `client_id` (UUID v4) for the handshake, then
    /// sends the subscription frame scoping delivery to this user's
    /// `generations` rows.
    pub async fn connect(&self) -> Result<ChangeFeedConnection, FeedError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/realtime/v1/changes?apikey={}&clientId={}",
            self.ws_url, self.api_key, client_id
        );

        let (mut ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            FeedError::Connection(format!(
                "Failed to connect to change feed at {}: {e}",
                self.ws_url
            ))
        })?;

        let subscribe = serde_json::json!({
            "action": "subscribe",
            "table": TABLE_GENERATIONS,
            "filter": { "user_id": self.user_id },
        });
        ws_stream
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| FeedError::Protocol(format!("Failed to send subscription: {e}")))?;

        tracing::info!(
            user_id = %self.user_id,
            client_id = %client_id,
            "Subscribed to change feed at {}",
            self.ws_url,
        );

        Ok(ChangeFeedConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Errors that can occur on the change-feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Owner of the change-feed task.
///
/// Created once per signed-in session via [`ChangeFeed::start`]; the
/// returned `Arc` is cheap to clone into the engine.
pub struct ChangeFeed {
    event_tx: broadcast::Sender<ChangeEvent>,
    cancel: CancellationToken,
    task_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChangeFeed {
    /// Connect in the background and start delivering change events.
    pub fn start(user_id: UserId, ws_url: String, api_key: String) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let client = ChangeFeedClient::new(user_id, ws_url, api_key);
        let task_tx = event_tx.clone();
        let task_cancel = cancel.child_token();
        let task_handle = tokio::spawn(async move {
            tracing::info!(user_id = %client.user_id(), "Change feed task started");
            run_feed_loop(&client, &task_tx, &task_cancel).await;
            tracing::info!(user_id = %client.user_id(), "Change feed task exited");
        });

        Arc::new(Self {
            event_tx,
            cancel,
            task_handle: tokio::sync::Mutex::new(Some(task_handle)),
        })
    }

    /// Subscribe to all change events delivered on this feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the feed task, waiting up to 5 seconds for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down change feed");
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
    }
}

/// Core feed loop: connect -> process frames -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_feed_loop(
    client: &ChangeFeedClient,
    event_tx: &broadcast::Sender<ChangeEvent>,
    cancel: &CancellationToken,
) {
    let reconnect_config = ReconnectConfig::default();

    loop {
        // Attempt to connect (or reconnect).
        let conn = match client.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    user_id = %client.user_id(),
                    error = %e,
                    "Feed connection failed, entering reconnect loop",
                );
                match reconnect_loop(client, &reconnect_config, cancel).await {
                    Some(conn) => conn,
                    None => return, // cancelled
                }
            }
        };

        // Process frames until the connection drops or we are cancelled.
        let mut ws_stream = conn.ws_stream;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = process_frames(&mut ws_stream, client.user_id(), event_tx) => {}
        }

        if cancel.is_cancelled() {
            return;
        }

        tracing::info!(user_id = %client.user_id(), "Feed connection lost, entering reconnect loop");
        match reconnect_loop(client, &reconnect_config, cancel).await {
            Some(_) => continue, // loop back and process frames
            None => return,      // cancelled
        }
    }
}

/// Process WebSocket frames from an established subscription.
///
/// Loops until the WebSocket closes, encounters a fatal receive error,
/// or the stream is exhausted.  Each text frame is parsed via
/// [`parse_frame`]; job-row changes for the subscribed user are
/// broadcast, everything else is logged and skipped.
pub async fn process_frames(
    ws_stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    user_id: UserId,
    event_tx: &broadcast::Sender<ChangeEvent>,
) {
    while let Some(frame_result) = ws_stream.next().await {
        match frame_result {
            Ok(Message::Text(text)) => {
                handle_text_frame(&text, user_id, event_tx);
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(user_id = %user_id, "Ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(user_id = %user_id, ?frame, "Change feed WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Parse and route a single text frame.
fn handle_text_frame(text: &str, user_id: UserId, event_tx: &broadcast::Sender<ChangeEvent>) {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                raw_frame = %text,
                "Failed to parse change-feed frame",
            );
            return;
        }
    };

    let Some(event) = frame.into_change() else {
        tracing::trace!(user_id = %user_id, "Skipping non-job frame");
        return;
    };

    // The subscription is server-filtered; rows for other users are
    // dropped here as well.
    let owner = match &event {
        ChangeEvent::Inserted(job) | ChangeEvent::Updated(job) => Some(job.user_id),
        ChangeEvent::Deleted(_) => None,
    };
    if let Some(owner) = owner {
        if owner != user_id {
            tracing::trace!(user_id = %user_id, row_owner = %owner, "Dropping foreign row frame");
            return;
        }
    }

    // Ignore the SendError -- it only means there are zero receivers.
    let _ = event_tx.send(event);
}
