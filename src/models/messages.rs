use actix::Message;
use serde::{Deserialize, Serialize};

/// Message sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessage {
    pub message_type: String,
    pub room: Option<String>,
    pub minutes: Option<u64>,
    pub move_from: Option<String>,
    pub move_to: Option<String>,
    pub promote_to: Option<String>,
}

/// Message sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServerMessage {
    pub message_type: String,
    pub room: Option<String>,
    pub fen: Option<String>,
    pub color: Option<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub winner: Option<String>,
    pub white_time: Option<u32>,
    pub black_time: Option<u32>,
    pub last_move: Option<[String; 2]>,
    pub available_moves: Option<Vec<String>>,
    pub version: Option<u64>,
    pub error: Option<String>,
}

impl ServerMessage {
    pub fn error(room: Option<String>, text: impl Into<String>) -> ServerMessage {
        ServerMessage {
            message_type: "error".to_string(),
            room,
            error: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Raw text pushed into a websocket session from another actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SessionText(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_with_missing_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"message_type":"create","minutes":5}"#).unwrap();
        assert_eq!(msg.message_type, "create");
        assert_eq!(msg.minutes, Some(5));
        assert_eq!(msg.move_from, None);
    }

    #[test]
    fn error_helper_sets_type_and_text() {
        let msg = ServerMessage::error(Some("ABC123".to_string()), "not your turn");
        assert_eq!(msg.message_type, "error");
        assert_eq!(msg.error.as_deref(), Some("not your turn"));
        assert_eq!(msg.fen, None);
    }
}
