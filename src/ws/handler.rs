//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ConnId, Outbound};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Direct replies queued for one connection
const OUTBOX_CAPACITY: usize = 32;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Uuid::new_v4();
    info!(conn_id = %conn, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

    if !state.game.connect(conn, outbox_tx).await {
        error!(conn_id = %conn, "Room scheduler unavailable");
        return;
    }

    let writer_handle = tokio::spawn(run_writer(conn, ws_sink, outbox_rx));

    // Reader loop: WebSocket -> scheduler
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(msg) => {
                    if !state.game.send(conn, msg).await {
                        debug!(conn_id = %conn, "Command channel closed");
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn_id = %conn, error = %e, "Failed to parse client message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.game.disconnect(conn).await;
    writer_handle.abort();

    info!(conn_id = %conn, "WebSocket connection closed");
}

/// Writer task: direct replies and room state frames -> WebSocket
async fn run_writer(
    conn: ConnId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<Outbound>,
) {
    let mut room_rx: Option<broadcast::Receiver<ServerMsg>> = None;

    loop {
        let msg = tokio::select! {
            out = outbox_rx.recv() => match out {
                Some(Outbound::Msg(msg)) => msg,
                Some(Outbound::Subscribe(rx)) => {
                    room_rx = Some(rx);
                    continue;
                }
                None => break,
            },
            frame = recv_room(&mut room_rx) => match frame {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(conn_id = %conn, skipped = n, "Client lagged, skipping state frames");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    room_rx = None;
                    continue;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(conn_id = %conn, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Next state frame of the current room; pends forever when not in a room
async fn recv_room(
    room_rx: &mut Option<broadcast::Receiver<ServerMsg>>,
) -> Result<ServerMsg, broadcast::error::RecvError> {
    match room_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
