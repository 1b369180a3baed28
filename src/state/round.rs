use super::AppState;
use crate::error::{GameError, GameResult};
use crate::types::*;

/// Outcome of one `player_ready` message
#[derive(Debug)]
pub enum ReadyOutcome {
    /// Everyone connected was ready; the next round has begun
    Started(RoomSnapshot),
    /// Still waiting on somebody
    Progress {
        ready_count: usize,
        total_count: usize,
        snapshot: RoomSnapshot,
    },
}

/// Lower the between-rounds barrier if every connected player is ready.
/// Departures call this too: the last holdout leaving must not strand the
/// rest of the room at the barrier.
pub(super) fn release_barrier_if_ready(room: &mut Room) -> bool {
    if !room.waiting_for_players || room.connected_count() == 0 {
        return false;
    }
    let all_ready = room
        .players
        .iter()
        .filter(|p| !p.disconnected)
        .all(|p| room.ready_players.contains(&p.id));
    if !all_ready {
        return false;
    }
    room.waiting_for_players = false;
    room.ready_players.clear();
    room.game_over = false;
    true
}

impl Room {
    /// Budget spent so far: approved questions and guesses cost 1,
    /// approved hints cost `hint_cost`. Rejected votes are free.
    pub fn questions_used(&self, config: &GameConfig) -> u32 {
        self.questions_asked
            .iter()
            .filter(|entry| entry.result == VoteResult::Approved)
            .map(|entry| match entry.kind {
                VoteKind::Question | VoteKind::Guess => 1,
                VoteKind::Hint => config.hint_cost,
                VoteKind::GiveUp => 0,
            })
            .sum()
    }
}

impl AppState {
    /// Host starts the first round once enough players are in.
    pub async fn start_game(&self, code: &str, player_id: &str) -> GameResult<RoomSnapshot> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        let is_host = room.player(player_id).is_some_and(|p| p.is_host);
        if !is_host {
            return Err(GameError::NotHost);
        }
        if room.players.len() < self.config.min_players {
            return Err(GameError::NotEnoughPlayers(self.config.min_players));
        }

        room.game_started = true;
        tracing::info!("Game started in room {}", code);
        Ok(RoomSnapshot::from(&*room))
    }

    /// Host requests the next movie after a round ended. The room keeps its
    /// category selection, a fresh movie is fetched, and everyone has to
    /// ready up before play resumes.
    pub async fn next_movie(&self, code: &str, player_id: &str) -> GameResult<RoomSnapshot> {
        let category_params = {
            let rooms = self.rooms.read().await;
            let room = rooms.get(code).ok_or(GameError::RoomNotFound)?;
            let is_host = room.player(player_id).is_some_and(|p| p.is_host);
            if !is_host {
                return Err(GameError::NotHost);
            }
            // Only an ended round may be replaced. A resolving vote also
            // keeps game_over false, so this cannot race a resolution in
            // flight.
            if !room.game_over {
                return Err(GameError::RoundNotOver);
            }
            if !room.active_vote.is_idle() {
                return Err(GameError::VoteAlreadyActive);
            }
            room.category_params.clone()
        };

        // Fetch outside the lock; the room may be touched meanwhile
        let movie = self
            .oracle
            .fetch_movie(&category_params)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch next movie for room {}: {}", code, e);
                GameError::ContentUnavailable
            })?;

        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        // The lock was released for the fetch; re-check before resetting
        if !room.game_over {
            return Err(GameError::RoundNotOver);
        }
        if !room.active_vote.is_idle() {
            return Err(GameError::VoteAlreadyActive);
        }

        tracing::info!("New movie for room {}: {}", code, movie.title);
        room.movie = movie;
        room.questions_asked.clear();
        room.active_vote = VoteState::Idle;
        room.game_over = true;
        room.game_started = true;
        room.waiting_for_players = true;
        room.ready_players.clear();

        Ok(RoomSnapshot::from(&*room))
    }

    /// A player signals readiness for the next round. Readying up while no
    /// barrier is raised is harmless.
    pub async fn player_ready(&self, code: &str, player_id: &str) -> GameResult<ReadyOutcome> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(GameError::RoomNotFound)?;

        if room.player(player_id).is_none() {
            return Err(GameError::InvalidMessage("Player not in room".to_string()));
        }
        room.ready_players.insert(player_id.to_string());

        if release_barrier_if_ready(room) {
            tracing::info!("All players ready in room {}, next round begins", code);
            return Ok(ReadyOutcome::Started(RoomSnapshot::from(&*room)));
        }

        Ok(ReadyOutcome::Progress {
            ready_count: room.ready_players.len(),
            total_count: room.connected_count(),
            snapshot: RoomSnapshot::from(&*room),
        })
    }
}
