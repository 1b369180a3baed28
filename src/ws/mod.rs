mod handlers;

pub use handlers::handle_message;

use crate::error::GameError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, DepartureOutcome};
use crate::types::ConnId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: ConnId = ulid::Ulid::new().to_string();
    tracing::debug!("WebSocket connected: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    // Broadcasts from anywhere in the app are queued here and pumped out by
    // this connection's own loop.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(json) = outbound else { break };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if let Some(reply) =
                                    handlers::handle_message(&state, &conn_id, &tx, msg).await
                                {
                                    send_on(&tx, &reply);
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Unparseable message from {}: {}", conn_id, e);
                                let reply: ServerMessage = GameError::InvalidMessage(
                                    format!("Unrecognized message: {e}"),
                                )
                                .into();
                                send_on(&tx, &reply);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket closed: {}", conn_id);
    handle_disconnect(&state, &conn_id).await;
}

fn send_on(tx: &mpsc::UnboundedSender<String>, message: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let _ = tx.send(json);
    }
}

/// Mark the player disconnected and start the grace timer. If they have not
/// reconnected when it fires (checked by epoch, so a reconnect-then-drop
/// restarts the clock), they are removed for good.
async fn handle_disconnect(state: &Arc<AppState>, conn: &ConnId) {
    let Some(session) = state.unbind(conn).await else {
        return;
    };

    let Some((epoch, snapshot)) = state
        .mark_disconnected(&session.room_code, &session.player_id)
        .await
    else {
        return;
    };

    tracing::info!(
        "Player {} disconnected from room {}, grace period running",
        session.player_id,
        session.room_code
    );
    state
        .broadcast_to_room(
            &session.room_code,
            &ServerMessage::PlayerDisconnected {
                player_id: session.player_id.clone(),
                room: snapshot,
            },
            None,
        )
        .await;

    let state = Arc::clone(state);
    let grace = state.config.disconnect_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;

        let Some(outcome) = state
            .finalize_disconnect(&session.room_code, &session.player_id, epoch)
            .await
        else {
            return;
        };

        match outcome {
            DepartureOutcome::RoomDeleted => {
                tracing::info!("Room {} deleted, last player timed out", session.room_code);
            }
            DepartureOutcome::Remaining {
                snapshot,
                barrier_released,
            } => {
                tracing::info!(
                    "Player {} removed from room {} after grace period",
                    session.player_id,
                    session.room_code
                );
                state
                    .broadcast_to_room(
                        &session.room_code,
                        &ServerMessage::PlayerLeft {
                            player_id: session.player_id.clone(),
                            room: snapshot.clone(),
                        },
                        None,
                    )
                    .await;
                if barrier_released {
                    state
                        .broadcast_to_room(
                            &session.room_code,
                            &ServerMessage::NewMovieStarted { room: snapshot },
                            None,
                        )
                        .await;
                }
            }
        }
    });
}
