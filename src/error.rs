use crate::protocol::ServerMessage;

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;

/// Errors a single client request can fail with. Every variant is terminal
/// for the triggering request only: it is reported back to the originating
/// connection as an `error` message and never affects other players.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Game already started")]
    GameAlreadyStarted,

    #[error("A vote is already in progress")]
    VoteAlreadyActive,

    #[error("The round is not over yet")]
    RoundNotOver,

    #[error("Only the proposer can cancel the vote")]
    NotProposer,

    #[error("Only the host can do that")]
    NotHost,

    #[error("Need at least {0} players to start")]
    NotEnoughPlayers(usize),

    #[error("Failed to fetch movie")]
    ContentUnavailable,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl GameError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound => "ROOM_NOT_FOUND",
            GameError::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            GameError::VoteAlreadyActive => "VOTE_ALREADY_ACTIVE",
            GameError::RoundNotOver => "ROUND_NOT_OVER",
            GameError::NotProposer => "NOT_PROPOSER",
            GameError::NotHost => "NOT_HOST",
            GameError::NotEnoughPlayers(_) => "NOT_ENOUGH_PLAYERS",
            GameError::ContentUnavailable => "CONTENT_UNAVAILABLE",
            GameError::InvalidMessage(_) => "INVALID_MESSAGE",
        }
    }
}

impl From<GameError> for ServerMessage {
    fn from(err: GameError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
