// =============================================================================
// WebSocket Handler — live bar stream
// =============================================================================
//
// Clients connect to `/api/v1/stream` and drive subscriptions with JSON text
// frames:
//   {"op":"subscribe","symbol":"WIF/USDC","resolution":"1S","uid":"chart-1"}
//   {"op":"unsubscribe","uid":"chart-1"}
//
// and receive:
//   {"type":"subscribed","uid":"chart-1","channel":"<addr>:<net>@1S"}
//   {"type":"bar","uid":"chart-1","bar":{time,open,high,low,close,volume}}
//   {"type":"reset","uid":"chart-1"}
//   {"type":"unsubscribed","uid":"chart-1"}
//   {"type":"error","uid":"chart-1","message":"..."}
//
// UIDs are scoped to the connection; every subscription the connection still
// holds is released when it closes.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::market_data::Bar;

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe {
        symbol: String,
        resolution: String,
        uid: String,
    },
    Unsubscribe {
        uid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Subscribed {
        uid: String,
        channel: String,
    },
    Unsubscribed {
        uid: String,
    },
    Bar {
        uid: String,
        bar: Bar,
    },
    Reset {
        uid: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
        message: String,
    },
}

// =============================================================================
// Upgrade
// =============================================================================

pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

async fn handle_stream_connection(socket: WebSocket, state: Arc<AppState>) {
    let connection = Uuid::new_v4().to_string();
    let clients = state.client_connected();
    info!(connection = %connection, clients, "stream client connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut owned: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            Some(out) = rx.recv() => {
                if let Err(e) = send_json(&mut sender, &out).await {
                    debug!(connection = %connection, error = %e, "stream send failed, disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&state, &connection, &text, &tx, &mut owned).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "stream receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }

    for uid in &owned {
        state.datafeed.unsubscribe_bars(&consumer_id(&connection, uid));
    }
    state.client_disconnected();
    info!(connection = %connection, released = owned.len(), "stream client disconnected");
}

/// Multiplexer consumer id for a client uid on one connection.
fn consumer_id(connection: &str, uid: &str) -> String {
    format!("{connection}/{uid}")
}

async fn handle_client_text(
    state: &Arc<AppState>,
    connection: &str,
    text: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    owned: &mut HashSet<String>,
) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(connection = %connection, error = %e, "malformed stream request");
            let _ = tx.send(ServerMessage::Error {
                uid: None,
                message: format!("malformed request: {e}"),
            });
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe {
            symbol,
            resolution,
            uid,
        } => {
            let reply = subscribe(state, connection, &symbol, &resolution, &uid, tx).await;
            if matches!(reply, ServerMessage::Subscribed { .. }) {
                owned.insert(uid);
            }
            let _ = tx.send(reply);
        }
        ClientMessage::Unsubscribe { uid } => {
            if owned.remove(&uid) {
                state.datafeed.unsubscribe_bars(&consumer_id(connection, &uid));
            }
            let _ = tx.send(ServerMessage::Unsubscribed { uid });
        }
    }
}

async fn subscribe(
    state: &Arc<AppState>,
    connection: &str,
    symbol: &str,
    resolution: &str,
    uid: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> ServerMessage {
    let error = |message: String| ServerMessage::Error {
        uid: Some(uid.to_string()),
        message,
    };

    let info = match state.resolve(symbol).await {
        Ok(info) => info,
        Err(e) => return error(e.to_string()),
    };

    let tick_tx = tx.clone();
    let tick_uid = uid.to_string();
    let reset_tx = tx.clone();
    let reset_uid = uid.to_string();
    let result = state.datafeed.subscribe_bars(
        &info,
        resolution,
        move |bar| {
            let _ = tick_tx.send(ServerMessage::Bar {
                uid: tick_uid.clone(),
                bar,
            });
        },
        &consumer_id(connection, uid),
        move || {
            let _ = reset_tx.send(ServerMessage::Reset {
                uid: reset_uid.clone(),
            });
        },
    );

    match result {
        Ok(()) => {
            let channel = crate::types::Resolution::parse(resolution)
                .map(|res| info.channel(res).to_string())
                .unwrap_or_default();
            debug!(connection = %connection, uid = %uid, channel = %channel, "stream subscription added");
            ServerMessage::Subscribed {
                uid: uid.to_string(),
                channel,
            }
        }
        Err(e) => error(e.to_string()),
    }
}

async fn send_json<S>(sender: &mut S, msg: &ServerMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialise stream message");
            Ok(())
        }
    }
}
