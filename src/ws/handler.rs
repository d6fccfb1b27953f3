//! WebSocket upgrade handler and session loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{JoinError, RoomEvent, RoomHandle, SessionTx};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, GameMode, ServerMsg, Team};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (session_tx, session_rx) = SessionTx::channel();
    let writer = tokio::spawn(write_outbound(ws_sink, session_rx, conn_id));

    let room = run_session(conn_id, ws_stream, session_tx, writer, &state).await;

    // Disconnect is the only cancellation signal: release everything the
    // session held (player slot, bomb carrier, pending warning) right now.
    if let Some(handle) = room {
        let _ = handle.event_tx.send(RoomEvent::Leave { conn_id }).await;
    }

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Session state machine: awaiting-join until a room admits us, then a relay
/// into that room's mailbox until either side goes away.
async fn run_session(
    conn_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    session_tx: SessionTx,
    mut writer: tokio::task::JoinHandle<()>,
    state: &AppState,
) -> Option<RoomHandle> {
    let rate_limiter = PlayerRateLimiter::new();
    // Dropped once a room admits us, so the room holds the only sender and
    // its eviction closes the writer.
    let mut session_tx = Some(session_tx);
    let mut room: Option<RoomHandle> = None;

    loop {
        tokio::select! {
            // Writer gone: the room evicted us or the socket write side died
            _ = &mut writer => break,

            incoming = ws_stream.next() => {
                let Some(result) = incoming else { break };
                match result {
                    Ok(Message::Text(text)) => {
                        if !rate_limiter.check_input() {
                            warn!(conn_id = %conn_id, "Rate limited input message");
                            continue;
                        }
                        let msg = match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                                continue;
                            }
                        };
                        if !dispatch(conn_id, msg, &mut room, &mut session_tx, &rate_limiter, state).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(conn_id = %conn_id, "Received binary message, ignoring");
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        info!(conn_id = %conn_id, "Client initiated close");
                        break;
                    }
                    Err(e) => {
                        error!(conn_id = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    writer.abort();
    room
}

/// Route one parsed message. Returns false when the session should end.
async fn dispatch(
    conn_id: Uuid,
    msg: ClientMsg,
    room: &mut Option<RoomHandle>,
    session_tx: &mut Option<SessionTx>,
    rate_limiter: &PlayerRateLimiter,
    state: &AppState,
) -> bool {
    match (room.as_ref(), msg) {
        (
            None,
            ClientMsg::Join {
                name,
                room: room_id,
                mode,
                team_preference,
            },
        ) => {
            let Some(tx) = session_tx.as_ref() else {
                return true;
            };
            match join_room(state, conn_id, &room_id, mode, name, team_preference, tx.clone()).await
            {
                Ok(handle) => {
                    info!(conn_id = %conn_id, room_id = %room_id, "Session joined room");
                    *room = Some(handle);
                    *session_tx = None;
                }
                Err(err) => {
                    // The connection stays open so the client can try another room
                    info!(conn_id = %conn_id, room_id = %room_id, error = %err, "Join refused");
                    if let Some(tx) = session_tx.as_ref() {
                        tx.send(ServerMsg::ErrorMsg {
                            message: err.to_string(),
                        });
                    }
                }
            }
            true
        }

        (Some(_), ClientMsg::Join { .. }) => {
            warn!(conn_id = %conn_id, "Already in a room, ignoring join");
            true
        }

        (None, _) => {
            debug!(conn_id = %conn_id, "Message before join, ignoring");
            true
        }

        (Some(handle), msg) => {
            if matches!(msg, ClientMsg::ChatMessage { .. }) && !rate_limiter.check_chat() {
                warn!(conn_id = %conn_id, "Rate limited chat message");
                return true;
            }

            let volatile = msg.is_volatile();
            let event = RoomEvent::Client {
                conn_id,
                msg,
                received_at: unix_millis(),
            };
            if volatile {
                // Droppable under backpressure; the next update supersedes it
                !matches!(
                    handle.event_tx.try_send(event),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            } else {
                handle.event_tx.send(event).await.is_ok()
            }
        }
    }
}

/// Resolve the room and run the join handshake. Retries once when the room
/// shut down between lookup and delivery.
async fn join_room(
    state: &AppState,
    conn_id: Uuid,
    room_id: &str,
    mode: GameMode,
    name: String,
    team_preference: Option<Team>,
    tx: SessionTx,
) -> Result<RoomHandle, JoinError> {
    for _ in 0..2 {
        let handle = state.rooms.get_or_create(room_id, mode);
        let (reply_tx, reply_rx) = oneshot::channel();
        let join = RoomEvent::Join {
            conn_id,
            name: name.clone(),
            team_preference,
            is_bot: false,
            tx: tx.clone(),
            reply: reply_tx,
        };
        if handle.event_tx.send(join).await.is_err() {
            continue;
        }
        match reply_rx.await {
            Ok(Ok(())) => return Ok(handle),
            Ok(Err(err)) => return Err(err),
            Err(_) => continue,
        }
    }
    Err(JoinError::Closed)
}

/// Drain the session's outbound queue into the socket. Ends when the queue
/// closes (every sender dropped, i.e. the room evicted this session) or a
/// write fails.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMsg>,
    conn_id: Uuid,
) {
    while let Some(msg) = rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "Failed to serialize message");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
