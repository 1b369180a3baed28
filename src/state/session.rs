use super::AppState;
use crate::protocol::ServerMessage;
use crate::types::*;
use tokio::sync::mpsc;

/// Transport-scoped binding from a live connection to a player in a room.
/// Exists only while the connection is open; the sender is the connection's
/// outbound channel, which makes the registry double as the broadcast
/// recipient list.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    pub room_code: RoomCode,
    pub tx: mpsc::UnboundedSender<String>,
}

impl AppState {
    /// Associate a connection with a player and room
    pub async fn bind(
        &self,
        conn: &ConnId,
        player_id: PlayerId,
        room_code: RoomCode,
        tx: mpsc::UnboundedSender<String>,
    ) {
        self.sessions.write().await.insert(
            conn.clone(),
            Session {
                player_id,
                room_code,
                tx,
            },
        );
    }

    pub async fn lookup(&self, conn: &ConnId) -> Option<Session> {
        self.sessions.read().await.get(conn).cloned()
    }

    pub async fn unbind(&self, conn: &ConnId) -> Option<Session> {
        self.sessions.write().await.remove(conn)
    }

    pub async fn connections_in_room(&self, room_code: &str) -> Vec<ConnId> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.room_code == room_code)
            .map(|(conn, _)| conn.clone())
            .collect()
    }

    /// Send a message to every connection bound to the room, optionally
    /// excluding one. Serializes once; closed channels are skipped (the
    /// owning socket task is already on its way out).
    pub async fn broadcast_to_room(
        &self,
        room_code: &str,
        message: &ServerMessage,
        exclude: Option<&ConnId>,
    ) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast message: {}", e);
                return;
            }
        };

        let sessions = self.sessions.read().await;
        for (conn, session) in sessions.iter() {
            if session.room_code != room_code {
                continue;
            }
            if exclude.is_some_and(|ex| ex == conn) {
                continue;
            }
            let _ = session.tx.send(json.clone());
        }
    }
}
