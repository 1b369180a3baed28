mod matching;
mod room;
mod round;
mod session;
mod vote;

pub use room::{DepartureOutcome, JoinOutcome};
pub use round::ReadyOutcome;
pub use session::Session;
pub use vote::BallotUpdate;

use crate::oracle::MovieOracle;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state. The rooms map is the single authority for game
/// state; the sessions map binds live connections to players and carries
/// their outbound channels for broadcast.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<RoomCode, Room>>>,
    pub sessions: Arc<RwLock<HashMap<ConnId, Session>>>,
    pub oracle: Arc<dyn MovieOracle>,
    pub config: GameConfig,
}

impl AppState {
    pub fn new(oracle: Arc<dyn MovieOracle>) -> Self {
        Self::with_config(oracle, GameConfig::default())
    }

    pub fn with_config(oracle: Arc<dyn MovieOracle>, config: GameConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            oracle,
            config,
        }
    }

    pub async fn room_snapshot(&self, code: &str) -> Option<RoomSnapshot> {
        self.rooms.read().await.get(code).map(RoomSnapshot::from)
    }
}
