use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type RoomCode = String;
pub type ConnId = String;

/// Tunable game rules
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Budget of questions a room gets per movie
    pub question_budget: u32,
    /// How many budget units an approved hint consumes
    pub hint_cost: u32,
    /// Minimum players before the host may start the game
    pub min_players: usize,
    /// Grace period before a disconnected player is removed
    pub disconnect_grace: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            question_budget: 15,
            hint_cost: 2,
            min_players: 2,
            disconnect_grace: Duration::from_secs(30),
        }
    }
}

impl GameConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            question_budget: std::env::var("GAME_QUESTION_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.question_budget),
            hint_cost: std::env::var("GAME_HINT_COST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.hint_cost),
            min_players: std::env::var("GAME_MIN_PLAYERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_players),
            disconnect_grace: std::env::var("GAME_DISCONNECT_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.disconnect_grace),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastMember {
    pub name: String,
    pub character: String,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMember {
    pub name: String,
    pub job: String,
}

/// The secret item of a room. Never serialized into room snapshots; only the
/// end-of-round messages carry it to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: u64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub original_title: String,
    #[serde(default)]
    pub alternative_titles: Vec<String>,
    pub backdrop_path: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub release_year: String,
    pub genres: Vec<String>,
    pub overview: String,
    pub runtime: Option<u32>,
    pub rating: f64,
    pub cast: Vec<CastMember>,
    pub crew: Vec<CrewMember>,
    pub keywords: Vec<String>,
    pub tagline: Option<String>,
    pub budget: u64,
    pub revenue: u64,
    pub vote_count: u64,
}

impl Movie {
    pub fn director(&self) -> Option<&str> {
        self.crew
            .iter()
            .find(|c| c.job == "Director")
            .map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Opaque avatar descriptor chosen client-side
    pub avatar: Option<serde_json::Value>,
    pub is_host: bool,
    pub disconnected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Bumped on every disconnect; a scheduled removal only fires if its
    /// epoch still matches, so a reconnect invalidates it.
    #[serde(skip)]
    pub disconnect_epoch: u64,
    pub wins: u32,
}

impl Player {
    pub fn new(
        id: PlayerId,
        name: String,
        avatar: Option<serde_json::Value>,
        is_host: bool,
    ) -> Self {
        Self {
            id,
            name,
            avatar,
            is_host,
            disconnected: false,
            disconnected_at: None,
            disconnect_epoch: 0,
            wins: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Question,
    Hint,
    GiveUp,
    Guess,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Ballot {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoteResult {
    Approved,
    Rejected,
}

/// A proposal awaiting ratification by the room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub kind: VoteKind,
    /// Question text for `Question` votes, a short label otherwise
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guess: Option<String>,
    pub proposed_by: PlayerId,
    pub proposed_by_name: String,
    pub ballots: HashMap<PlayerId, Ballot>,
    pub started_at: DateTime<Utc>,
}

impl Vote {
    pub fn yes_count(&self) -> usize {
        self.ballots.values().filter(|b| **b == Ballot::Yes).count()
    }

    pub fn no_count(&self) -> usize {
        self.ballots.values().filter(|b| **b == Ballot::No).count()
    }
}

/// The vote slot's state machine, explicit in the type system.
///
/// `Resolving` keeps the slot occupied while the oracle call for an approved
/// vote is outstanding, so new proposals fail and late ballots are ignored.
#[derive(Debug, Clone, Default)]
pub enum VoteState {
    #[default]
    Idle,
    Pending(Vote),
    Resolving(Vote),
}

impl VoteState {
    pub fn is_idle(&self) -> bool {
        matches!(self, VoteState::Idle)
    }

    /// The vote occupying the slot, pending or resolving
    pub fn active(&self) -> Option<&Vote> {
        match self {
            VoteState::Idle => None,
            VoteState::Pending(v) | VoteState::Resolving(v) => Some(v),
        }
    }
}

/// Immutable record of a resolved vote. The append-only list of these drives
/// the question-budget calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub kind: VoteKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guess: Option<String>,
    pub proposed_by_name: String,
    pub ballots: HashMap<PlayerId, Ballot>,
    pub yes_voters: Vec<String>,
    pub no_voters: Vec<String>,
    pub result: VoteResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct_guess: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub movie: Movie,
    pub category: String,
    /// Stored per room so "next movie" keeps drawing from the same category
    pub category_params: HashMap<String, String>,
    pub players: Vec<Player>,
    pub questions_asked: Vec<HistoryEntry>,
    pub active_vote: VoteState,
    pub game_started: bool,
    pub game_over: bool,
    pub waiting_for_players: bool,
    pub ready_players: HashSet<PlayerId>,
}

impl Room {
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| !p.disconnected)
    }

    pub fn connected_count(&self) -> usize {
        self.connected_players().count()
    }
}

/// Room view sent to clients. Deliberately omits the movie: the secret item
/// only leaves the server in `game_won` / `game_over` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: RoomCode,
    pub category: String,
    pub players: Vec<Player>,
    pub questions_asked: Vec<HistoryEntry>,
    pub active_vote: Option<Vote>,
    pub game_started: bool,
    pub game_over: bool,
    pub waiting_for_players: bool,
    pub ready_players: Vec<PlayerId>,
}

impl From<&Room> for RoomSnapshot {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            category: room.category.clone(),
            players: room.players.clone(),
            questions_asked: room.questions_asked.clone(),
            active_vote: room.active_vote.active().cloned(),
            game_started: room.game_started,
            game_over: room.game_over,
            waiting_for_players: room.waiting_for_players,
            ready_players: room.ready_players.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_movie(title: &str) -> Movie {
    Movie {
        id: 1,
        imdb_id: None,
        title: title.to_string(),
        original_title: title.to_string(),
        alternative_titles: vec![],
        backdrop_path: None,
        poster_path: None,
        release_date: None,
        release_year: "1999".to_string(),
        genres: vec!["Drama".to_string()],
        overview: "A test movie.".to_string(),
        runtime: Some(120),
        rating: 7.5,
        cast: vec![],
        crew: vec![],
        keywords: vec![],
        tagline: None,
        budget: 0,
        revenue: 0,
        vote_count: 100,
    }
}
