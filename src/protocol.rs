use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a player asks the room to ratify. A proper tagged union instead of
/// sentinel strings smuggled through the question field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoteProposal {
    Question { text: String },
    Hint,
    GiveUp,
    Guess { text: String },
}

impl VoteProposal {
    pub fn kind(&self) -> VoteKind {
        match self {
            VoteProposal::Question { .. } => VoteKind::Question,
            VoteProposal::Hint => VoteKind::Hint,
            VoteProposal::GiveUp => VoteKind::GiveUp,
            VoteProposal::Guess { .. } => VoteKind::Guess,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        player_name: String,
        player_avatar: Option<serde_json::Value>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        category_params: Option<HashMap<String, String>>,
        #[serde(default)]
        player_id: Option<PlayerId>,
    },
    JoinRoom {
        room_code: RoomCode,
        player_name: String,
        player_avatar: Option<serde_json::Value>,
        #[serde(default)]
        player_id: Option<PlayerId>,
    },
    ChatMessage {
        message: String,
    },
    StartVote {
        proposal: VoteProposal,
    },
    CastVote {
        vote: Ballot,
    },
    CancelVote,
    StartGame,
    NextMovie,
    PlayerReady,
    LeaveRoom,
}

/// Why a round ended without a correct guess
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    GiveUp,
    MaxQuestions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomCreated {
        room_code: RoomCode,
        player_id: PlayerId,
        room: RoomSnapshot,
    },
    RoomJoined {
        room_code: RoomCode,
        player_id: PlayerId,
        room: RoomSnapshot,
    },
    PlayerJoined {
        player: Player,
        room: RoomSnapshot,
    },
    PlayerReconnected {
        player_id: PlayerId,
        room: RoomSnapshot,
    },
    PlayerDisconnected {
        player_id: PlayerId,
        room: RoomSnapshot,
    },
    PlayerLeft {
        player_id: PlayerId,
        room: RoomSnapshot,
    },
    ChatMessage {
        player_id: PlayerId,
        message: String,
        timestamp: DateTime<Utc>,
    },
    VoteStarted {
        vote: Vote,
    },
    VoteUpdated {
        vote: Vote,
        votes_count: usize,
        total_players: usize,
    },
    /// Quorum reached on an approved vote; the oracle call is outstanding
    VoteProcessing {
        vote_kind: VoteKind,
    },
    QuestionAnswered {
        question: String,
        answer: String,
        questions_count: usize,
        questions_used: u32,
        vote_details: HistoryEntry,
    },
    VoteRejected {
        question: String,
        vote_details: HistoryEntry,
    },
    VoteCancelled,
    GameStarted {
        room: RoomSnapshot,
    },
    GameWon {
        winner: Player,
        movie: Movie,
        questions_used: u32,
        vote_details: HistoryEntry,
    },
    GameOver {
        reason: GameOverReason,
        movie: Movie,
        #[serde(skip_serializing_if = "Option::is_none")]
        vote_details: Option<HistoryEntry>,
    },
    NewMovieWaiting {
        room: RoomSnapshot,
    },
    NewMovieStarted {
        room: RoomSnapshot,
    },
    PlayerReadyUpdate {
        ready_count: usize,
        total_count: usize,
        room: RoomSnapshot,
    },
    Error {
        code: String,
        message: String,
    },
}
