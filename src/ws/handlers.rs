use crate::error::{GameError, GameResult};
use crate::protocol::{ClientMessage, ServerMessage, VoteProposal};
use crate::state::{AppState, DepartureOutcome, JoinOutcome, ReadyOutcome, Session};
use crate::types::{Ballot, ConnId};
use chrono::Utc;
use tokio::sync::mpsc;

/// Dispatch one parsed client message. The returned message, if any, goes
/// back to the sending connection only; room-wide effects are broadcast from
/// inside the handlers.
pub async fn handle_message(
    state: &AppState,
    conn: &ConnId,
    tx: &mpsc::UnboundedSender<String>,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let result = match msg {
        ClientMessage::CreateRoom {
            player_name,
            player_avatar,
            category,
            category_params,
            player_id,
        } => {
            create_room(
                state,
                conn,
                tx,
                player_name,
                player_avatar,
                category.unwrap_or_else(|| "popular".to_string()),
                category_params.unwrap_or_default(),
                player_id,
            )
            .await
        }
        ClientMessage::JoinRoom {
            room_code,
            player_name,
            player_avatar,
            player_id,
        } => join_room(state, conn, tx, &room_code, player_name, player_avatar, player_id).await,
        ClientMessage::ChatMessage { message } => chat_message(state, conn, message).await,
        ClientMessage::StartVote { proposal } => start_vote(state, conn, proposal).await,
        ClientMessage::CastVote { vote } => cast_vote(state, conn, vote).await,
        ClientMessage::CancelVote => cancel_vote(state, conn).await,
        ClientMessage::StartGame => start_game(state, conn).await,
        ClientMessage::NextMovie => next_movie(state, conn).await,
        ClientMessage::PlayerReady => player_ready(state, conn).await,
        ClientMessage::LeaveRoom => leave_room(state, conn).await,
    };

    match result {
        Ok(reply) => reply,
        Err(err) => Some(err.into()),
    }
}

async fn require_session(state: &AppState, conn: &ConnId) -> GameResult<Session> {
    state
        .lookup(conn)
        .await
        .ok_or_else(|| GameError::InvalidMessage("Not in a room".to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn create_room(
    state: &AppState,
    conn: &ConnId,
    tx: &mpsc::UnboundedSender<String>,
    player_name: String,
    player_avatar: Option<serde_json::Value>,
    category: String,
    category_params: std::collections::HashMap<String, String>,
    player_id: Option<String>,
) -> GameResult<Option<ServerMessage>> {
    let (room_code, player_id, room) = state
        .create_room(player_name, player_avatar, category, category_params, player_id)
        .await?;

    state
        .bind(conn, player_id.clone(), room_code.clone(), tx.clone())
        .await;

    Ok(Some(ServerMessage::RoomCreated {
        room_code,
        player_id,
        room,
    }))
}

async fn join_room(
    state: &AppState,
    conn: &ConnId,
    tx: &mpsc::UnboundedSender<String>,
    room_code: &str,
    player_name: String,
    player_avatar: Option<serde_json::Value>,
    player_id: Option<String>,
) -> GameResult<Option<ServerMessage>> {
    let outcome = state
        .join_room(room_code, player_name, player_avatar, player_id)
        .await?;

    let (player_id, snapshot) = match outcome {
        JoinOutcome::Joined { player, snapshot } => {
            state
                .broadcast_to_room(
                    room_code,
                    &ServerMessage::PlayerJoined {
                        player: player.clone(),
                        room: snapshot.clone(),
                    },
                    Some(conn),
                )
                .await;
            (player.id, snapshot)
        }
        JoinOutcome::Reconnected { player_id, snapshot } => {
            state
                .broadcast_to_room(
                    room_code,
                    &ServerMessage::PlayerReconnected {
                        player_id: player_id.clone(),
                        room: snapshot.clone(),
                    },
                    Some(conn),
                )
                .await;
            (player_id, snapshot)
        }
    };

    state
        .bind(conn, player_id.clone(), room_code.to_string(), tx.clone())
        .await;

    Ok(Some(ServerMessage::RoomJoined {
        room_code: room_code.to_string(),
        player_id,
        room: snapshot,
    }))
}

async fn chat_message(
    state: &AppState,
    conn: &ConnId,
    message: String,
) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    state
        .broadcast_to_room(
            &session.room_code,
            &ServerMessage::ChatMessage {
                player_id: session.player_id,
                message,
                timestamp: Utc::now(),
            },
            None,
        )
        .await;
    Ok(None)
}

async fn start_vote(
    state: &AppState,
    conn: &ConnId,
    proposal: VoteProposal,
) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    let vote = state
        .start_vote(&session.room_code, &session.player_id, proposal)
        .await?;
    state
        .broadcast_to_room(&session.room_code, &ServerMessage::VoteStarted { vote }, None)
        .await;
    Ok(None)
}

async fn cast_vote(
    state: &AppState,
    conn: &ConnId,
    ballot: Ballot,
) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    let Some(update) = state
        .cast_ballot(&session.room_code, &session.player_id, ballot)
        .await?
    else {
        // No pending vote; the ballot arrived too late
        return Ok(None);
    };

    state
        .broadcast_to_room(
            &session.room_code,
            &ServerMessage::VoteUpdated {
                vote: update.vote,
                votes_count: update.votes_count,
                total_players: update.total_players,
            },
            None,
        )
        .await;

    if update.quorum_reached {
        state.resolve_active_vote(&session.room_code).await;
    }
    Ok(None)
}

async fn cancel_vote(state: &AppState, conn: &ConnId) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    if state
        .cancel_vote(&session.room_code, &session.player_id)
        .await?
    {
        state
            .broadcast_to_room(&session.room_code, &ServerMessage::VoteCancelled, None)
            .await;
    }
    Ok(None)
}

async fn start_game(state: &AppState, conn: &ConnId) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    let room = state
        .start_game(&session.room_code, &session.player_id)
        .await?;
    state
        .broadcast_to_room(&session.room_code, &ServerMessage::GameStarted { room }, None)
        .await;
    Ok(None)
}

async fn next_movie(state: &AppState, conn: &ConnId) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    let room = state
        .next_movie(&session.room_code, &session.player_id)
        .await?;
    state
        .broadcast_to_room(&session.room_code, &ServerMessage::NewMovieWaiting { room }, None)
        .await;
    Ok(None)
}

async fn player_ready(state: &AppState, conn: &ConnId) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    match state
        .player_ready(&session.room_code, &session.player_id)
        .await?
    {
        ReadyOutcome::Started(room) => {
            state
                .broadcast_to_room(
                    &session.room_code,
                    &ServerMessage::NewMovieStarted { room },
                    None,
                )
                .await;
        }
        ReadyOutcome::Progress {
            ready_count,
            total_count,
            snapshot,
        } => {
            state
                .broadcast_to_room(
                    &session.room_code,
                    &ServerMessage::PlayerReadyUpdate {
                        ready_count,
                        total_count,
                        room: snapshot,
                    },
                    None,
                )
                .await;
        }
    }
    Ok(None)
}

async fn leave_room(state: &AppState, conn: &ConnId) -> GameResult<Option<ServerMessage>> {
    let session = require_session(state, conn).await?;
    let outcome = state
        .leave_room(&session.room_code, &session.player_id)
        .await?;
    state.unbind(conn).await;

    if let DepartureOutcome::Remaining {
        snapshot,
        barrier_released,
    } = outcome
    {
        state
            .broadcast_to_room(
                &session.room_code,
                &ServerMessage::PlayerLeft {
                    player_id: session.player_id,
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
    Ok(None)
}
