// =============================================================================
// GraphQL WebSocket Client — `graphql-transport-ws` push subscriptions
// =============================================================================
//
// One background task owns the socket. `subscribe` is synchronous: it records
// the subscription in a shared table and asks the task to send it, so the
// caller learns immediately if the task is gone. The task:
//   - connects lazily on the first subscription,
//   - sends `connection_init` with the API key and waits for the ack,
//   - (re)sends every live subscription after each (re)connect,
//   - routes `next` / `error` / `complete` frames to the matching sink,
//   - answers protocol and transport pings,
//   - reconnects with exponential backoff (500 ms doubling to 15 s).
//
// Sinks are always invoked with the subscription table unlocked.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{GraphqlRequest, SubscriptionSink, UpstreamHandle};

const SUBPROTOCOL: &str = "graphql-transport-ws";
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_RECONNECT_DELAY_MS: u64 = 500;
const MAX_RECONNECT_DELAY_MS: u64 = 15_000;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct ActiveSubscription {
    request: GraphqlRequest,
    sink: SubscriptionSink,
}

#[derive(Default)]
struct Shared {
    subscriptions: Mutex<HashMap<String, ActiveSubscription>>,
}

impl Shared {
    fn sink(&self, id: &str) -> Option<SubscriptionSink> {
        self.subscriptions.lock().get(id).map(|s| s.sink.clone())
    }

    fn request(&self, id: &str) -> Option<GraphqlRequest> {
        self.subscriptions.lock().get(id).map(|s| s.request.clone())
    }

    fn remove(&self, id: &str) -> Option<SubscriptionSink> {
        self.subscriptions.lock().remove(id).map(|s| s.sink)
    }

    fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    fn all_requests(&self) -> Vec<(String, GraphqlRequest)> {
        self.subscriptions
            .lock()
            .iter()
            .map(|(id, s)| (id.clone(), s.request.clone()))
            .collect()
    }
}

#[derive(Debug)]
enum Command {
    Subscribe { id: String },
    Complete { id: String },
}

// ---------------------------------------------------------------------------
// Protocol frames
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Next {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
    Ping,
    Pong,
}

fn connection_init(api_key: &str) -> Message {
    Message::Text(json!({ "type": "connection_init", "payload": { "Authorization": api_key } }).to_string())
}

fn subscribe_frame(id: &str, request: &GraphqlRequest) -> Message {
    Message::Text(json!({ "id": id, "type": "subscribe", "payload": request }).to_string())
}

fn complete_frame(id: &str) -> Message {
    Message::Text(json!({ "id": id, "type": "complete" }).to_string())
}

fn pong_frame() -> Message {
    Message::Text(json!({ "type": "pong" }).to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle to the background subscription connection. Cheap to clone.
#[derive(Clone)]
pub struct GraphqlWsClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl GraphqlWsClient {
    /// Spawn the connection task on the current tokio runtime.
    pub fn spawn(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        tokio::spawn(run_connection_loop(
            url.into(),
            api_key.into(),
            Arc::downgrade(&shared),
            rx,
        ));
        Self { shared, commands }
    }

    /// Register a subscription and queue it for sending.
    pub fn subscribe(&self, request: GraphqlRequest, sink: SubscriptionSink) -> Result<UpstreamHandle> {
        let id = Uuid::new_v4().to_string();
        self.shared
            .subscriptions
            .lock()
            .insert(id.clone(), ActiveSubscription { request, sink });

        if self.commands.send(Command::Subscribe { id: id.clone() }).is_err() {
            self.shared.remove(&id);
            anyhow::bail!("subscription connection task has stopped");
        }
        debug!(subscription = %id, "subscription queued");

        let shared = Arc::downgrade(&self.shared);
        let commands = self.commands.clone();
        let release_id = id.clone();
        Ok(UpstreamHandle::new(id, move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove(&release_id);
            }
            let _ = commands.send(Command::Complete { id: release_id });
        }))
    }

    /// Number of subscriptions currently registered.
    pub fn active_count(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

enum ConnectionOutcome {
    Stop,
    Reconnect { reset_backoff: bool },
}

async fn run_connection_loop(
    url: String,
    api_key: String,
    shared: Weak<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut reconnect_delay = Duration::from_millis(INITIAL_RECONNECT_DELAY_MS);

    loop {
        // Stay idle until someone actually wants data.
        let idle = shared.upgrade().map_or(true, |s| s.is_empty());
        if idle {
            match commands.recv().await {
                Some(Command::Subscribe { .. }) => {}
                Some(Command::Complete { .. }) => continue,
                None => return,
            }
        }
        let Some(live) = shared.upgrade() else {
            return;
        };

        let outcome = run_single_connection(&url, &api_key, &live, &mut commands).await;
        drop(live);

        match outcome {
            Ok(ConnectionOutcome::Stop) => {
                info!(url = %url, "subscription connection closed");
                return;
            }
            Ok(ConnectionOutcome::Reconnect { reset_backoff }) => {
                if reset_backoff {
                    reconnect_delay = Duration::from_millis(INITIAL_RECONNECT_DELAY_MS);
                }
                warn!(url = %url, delay_ms = reconnect_delay.as_millis() as u64, "subscription connection lost, reconnecting");
            }
            Err(e) => {
                warn!(url = %url, error = %e, delay_ms = reconnect_delay.as_millis() as u64, "subscription connection failed, reconnecting");
            }
        }

        sleep(reconnect_delay).await;
        reconnect_delay = next_reconnect_delay(reconnect_delay);
    }
}

fn next_reconnect_delay(current: Duration) -> Duration {
    (current * 2).min(Duration::from_millis(MAX_RECONNECT_DELAY_MS))
}

async fn run_single_connection(
    url: &str,
    api_key: &str,
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<ConnectionOutcome> {
    let mut request = url
        .into_client_request()
        .context("invalid subscription endpoint")?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

    let (mut ws, _response) = connect_async(request)
        .await
        .context("failed to connect to subscription endpoint")?;
    info!(url = %url, "subscription WebSocket connected");

    ws.send(connection_init(api_key)).await?;
    timeout(ACK_TIMEOUT, wait_for_ack(&mut ws))
        .await
        .context("timed out waiting for connection_ack")??;
    debug!("connection_ack received");

    let mut sent: HashSet<String> = HashSet::new();
    for (id, request) in shared.all_requests() {
        ws.send(subscribe_frame(&id, &request)).await?;
        sent.insert(id);
    }
    if !sent.is_empty() {
        info!(count = sent.len(), "subscriptions (re)sent");
    }

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    None => {
                        let _ = ws.close(None).await;
                        return Ok(ConnectionOutcome::Stop);
                    }
                    Some(Command::Subscribe { id }) => {
                        if sent.contains(&id) {
                            continue;
                        }
                        // Already released before we got to it.
                        let Some(request) = shared.request(&id) else {
                            continue;
                        };
                        ws.send(subscribe_frame(&id, &request)).await?;
                        sent.insert(id);
                    }
                    Some(Command::Complete { id }) => {
                        if sent.remove(&id) {
                            ws.send(complete_frame(&id)).await?;
                            debug!(subscription = %id, "subscription completed by client");
                        }
                    }
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handle_server_text(&text, shared, &mut sent) {
                            ws.send(pong_frame()).await?;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "subscription WebSocket closed by server");
                        return Ok(ConnectionOutcome::Reconnect { reset_backoff: true });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(e).context("subscription WebSocket read error");
                    }
                    None => {
                        return Ok(ConnectionOutcome::Reconnect { reset_backoff: true });
                    }
                }
            }
        }
    }
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(msg) = ws.next().await {
        match msg.context("read error before connection_ack")? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::ConnectionAck) => return Ok(()),
                Ok(ServerMessage::Ping) => ws.send(pong_frame()).await?,
                _ => debug!(frame = %text, "ignoring frame before connection_ack"),
            },
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(frame) => anyhow::bail!("connection rejected: {frame:?}"),
            _ => {}
        }
    }
    anyhow::bail!("connection ended before connection_ack")
}

/// Route one text frame. Returns `true` when a protocol pong must be sent.
fn handle_server_text(text: &str, shared: &Shared, sent: &mut HashSet<String>) -> bool {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised subscription frame");
            return false;
        }
    };

    match msg {
        ServerMessage::Next { id, mut payload } => {
            let Some(sink) = shared.sink(&id) else {
                return false;
            };
            let data = payload.get_mut("data").map(Value::take).unwrap_or(Value::Null);
            if !data.is_null() {
                sink.data(data);
            } else if let Some(errors) = payload.get("errors") {
                sink.error(anyhow::anyhow!("subscription errors: {errors}"));
            }
        }
        ServerMessage::Error { id, payload } => {
            sent.remove(&id);
            if let Some(sink) = shared.remove(&id) {
                sink.error(anyhow::anyhow!("subscription rejected: {payload}"));
            }
        }
        ServerMessage::Complete { id } => {
            sent.remove(&id);
            if let Some(sink) = shared.remove(&id) {
                sink.complete();
            }
        }
        ServerMessage::Ping => return true,
        ServerMessage::ConnectionAck | ServerMessage::Pong => {}
    }
    false
}
