use super::round::release_barrier_if_ready;
use super::AppState;
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Room codes are 6 uppercase base36 characters
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;

fn generate_room_code() -> RoomCode {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn generate_player_id() -> PlayerId {
    ulid::Ulid::new().to_string()
}

/// Result of a join request: either a brand-new player or a rejoin by id
#[derive(Debug)]
pub enum JoinOutcome {
    Joined {
        player: Player,
        snapshot: RoomSnapshot,
    },
    Reconnected {
        player_id: PlayerId,
        snapshot: RoomSnapshot,
    },
}

/// Result of a player permanently leaving (explicit leave or expired grace)
#[derive(Debug)]
pub enum DepartureOutcome {
    RoomDeleted,
    Remaining {
        snapshot: RoomSnapshot,
        /// True if the departure released the ready barrier
        barrier_released: bool,
    },
}

impl AppState {
    /// Create a room with the requesting player as host. The movie fetch
    /// happens first: if the oracle fails, no room is created.
    pub async fn create_room(
        &self,
        host_name: String,
        host_avatar: Option<serde_json::Value>,
        category: String,
        category_params: HashMap<String, String>,
        player_id: Option<PlayerId>,
    ) -> GameResult<(RoomCode, PlayerId, RoomSnapshot)> {
        let movie = self
            .oracle
            .fetch_movie(&category_params)
            .await
            .map_err(|e| {
                tracing::error!("Movie fetch failed during room creation: {}", e);
                GameError::ContentUnavailable
            })?;

        let player_id = player_id.unwrap_or_else(generate_player_id);
        let host = Player::new(player_id.clone(), host_name, host_avatar, true);

        let mut rooms = self.rooms.write().await;

        // Collisions are vanishingly rare in a 36^6 space; retry regardless.
        let code = loop {
            let candidate = generate_room_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = Room {
            code: code.clone(),
            movie,
            category,
            category_params,
            players: vec![host],
            questions_asked: Vec::new(),
            active_vote: VoteState::Idle,
            game_started: false,
            game_over: false,
            waiting_for_players: false,
            ready_players: HashSet::new(),
        };

        let snapshot = RoomSnapshot::from(&room);
        rooms.insert(code.clone(), room);

        tracing::info!("Room created: {}", code);
        Ok((code, player_id, snapshot))
    }

    /// Join a room as a new player, or reconnect if the player id already
    /// belongs to it. Brand-new players are rejected once the game started.
    pub async fn join_room(
        &self,
        code: &str,
        player_name: String,
        player_avatar: Option<serde_json::Value>,
        player_id: Option<PlayerId>,
    ) -> GameResult<JoinOutcome> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        let existing_idx = player_id
            .as_deref()
            .and_then(|id| room.players.iter().position(|p| p.id == id));

        if let Some(idx) = existing_idx {
            let player = &mut room.players[idx];
            player.disconnected = false;
            player.disconnected_at = None;
            // Invalidate any scheduled grace-period removal
            player.disconnect_epoch += 1;
            let player_id = player.id.clone();

            tracing::info!("Player {} reconnected to room {}", player_name, code);
            return Ok(JoinOutcome::Reconnected {
                player_id,
                snapshot: RoomSnapshot::from(&*room),
            });
        }

        if room.game_started {
            return Err(GameError::GameAlreadyStarted);
        }

        let player = Player::new(
            player_id.unwrap_or_else(generate_player_id),
            player_name,
            player_avatar,
            false,
        );
        room.players.push(player.clone());

        tracing::info!("Player {} joined room {}", player.name, code);
        Ok(JoinOutcome::Joined {
            player,
            snapshot: RoomSnapshot::from(&*room),
        })
    }

    /// Mark a player disconnected and return the epoch a grace-period removal
    /// task must present to actually remove them.
    pub async fn mark_disconnected(
        &self,
        code: &str,
        player_id: &str,
    ) -> Option<(u64, RoomSnapshot)> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code)?;

        let player = room.player_mut(player_id)?;
        player.disconnected = true;
        player.disconnected_at = Some(Utc::now());
        player.disconnect_epoch += 1;
        let epoch = player.disconnect_epoch;

        // readyPlayers only tracks connected players
        room.ready_players.remove(player_id);

        tracing::info!("Player {} disconnected from room {}", player_id, code);
        Some((epoch, RoomSnapshot::from(&*room)))
    }

    /// Remove a player whose grace period expired. No-ops if the player
    /// reconnected in the meantime (the epoch no longer matches) or already
    /// left.
    pub async fn finalize_disconnect(
        &self,
        code: &str,
        player_id: &str,
        epoch: u64,
    ) -> Option<DepartureOutcome> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code)?;

        let player = room.player(player_id)?;
        if !player.disconnected || player.disconnect_epoch != epoch {
            return None;
        }

        let outcome = remove_player(room, player_id);
        if matches!(outcome, DepartureOutcome::RoomDeleted) {
            rooms.remove(code);
            tracing::info!("Room {} deleted (empty after grace period)", code);
        }
        Some(outcome)
    }

    /// Explicitly leave the room
    pub async fn leave_room(&self, code: &str, player_id: &str) -> GameResult<DepartureOutcome> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        if room.player(player_id).is_none() {
            return Err(GameError::InvalidMessage("Player not in room".to_string()));
        }

        let outcome = remove_player(room, player_id);
        if matches!(outcome, DepartureOutcome::RoomDeleted) {
            rooms.remove(code);
            tracing::info!("Room {} deleted (empty)", code);
        }

        tracing::info!("Player {} left room {}", player_id, code);
        Ok(outcome)
    }
}

/// Drop a player from the roster, reassigning the host role to the first
/// remaining player if needed and re-evaluating the ready barrier.
fn remove_player(room: &mut Room, player_id: &str) -> DepartureOutcome {
    let was_host = room.player(player_id).is_some_and(|p| p.is_host);

    room.players.retain(|p| p.id != player_id);
    room.ready_players.remove(player_id);

    if room.players.is_empty() {
        return DepartureOutcome::RoomDeleted;
    }

    if was_host {
        room.players[0].is_host = true;
        tracing::info!(
            "New host assigned in room {}: {}",
            room.code,
            room.players[0].name
        );
    }

    let barrier_released = release_barrier_if_ready(room);

    DepartureOutcome::Remaining {
        snapshot: RoomSnapshot::from(&*room),
        barrier_released,
    }
}
