//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::game::geometry::Vector;
use crate::game::Action;

/// Action sent from client to server.
///
/// Every field other than `player_id` and `timestamp` is optional; the
/// present ones are applied independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMsg {
    pub player_id: Uuid,
    #[serde(default)]
    pub position: Option<Vector>,
    #[serde(default)]
    pub direction: Option<Vector>,
    /// Player to eliminate
    #[serde(default)]
    pub kill: Option<Uuid>,
    #[serde(default)]
    pub start_task: Option<String>,
    #[serde(default)]
    pub cancel_task: Option<String>,
    #[serde(default)]
    pub complete_task: Option<String>,
    /// RFC 3339 client timestamp with nanosecond precision
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub drift: f64,
}

/// Problems with an otherwise well-formed message
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Action for {claimed} sent on the connection of {actual}")]
    WrongPlayer { claimed: Uuid, actual: Uuid },
}

impl ActionMsg {
    /// Parse a text frame sent by `player_id`'s connection
    pub fn parse(text: &str, player_id: Uuid, received_at: DateTime<Utc>) -> Result<Action, ProtocolError> {
        let msg: ActionMsg = serde_json::from_str(text)?;
        msg.into_action(player_id, received_at)
    }

    pub fn into_action(self, player_id: Uuid, received_at: DateTime<Utc>) -> Result<Action, ProtocolError> {
        if self.player_id != player_id {
            return Err(ProtocolError::WrongPlayer {
                claimed: self.player_id,
                actual: player_id,
            });
        }

        Ok(Action {
            position: self.position,
            direction: self.direction,
            kill: self.kill,
            start_task: self.start_task,
            cancel_task: self.cancel_task,
            complete_task: self.complete_task,
            drift: self.drift,
            received_at,
            ..Action::new(player_id, self.timestamp)
        })
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after a successful join
    Welcome {
        player_id: Uuid,
        match_id: Uuid,
        server_time: DateTime<Utc>,
    },

    /// Full match state (sent every tick)
    Snapshot(MatchSnapshot),

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

/// Complete match state as seen by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    /// 0 lobby, 1 in progress, 2 crew win, 3 adversary win
    pub status: u8,
    pub players: BTreeMap<Uuid, PlayerSnapshot>,
    pub tasks: BTreeMap<String, TaskSnapshot>,
    pub timestamp: DateTime<Utc>,
    /// Last snapshot of the match; the connection closes after it
    pub is_final: bool,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub alive: bool,
    pub adversary: bool,
    pub connected: bool,
    pub position: Vector,
    pub direction: Vector,
}

/// Task state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub location: Vector,
    /// Omitted while unclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_action() {
        let id = Uuid::new_v4();
        let victim = Uuid::new_v4();
        let text = format!(
            r#"{{
                "player_id": "{id}",
                "position": {{"x": 820.5, "y": 300}},
                "direction": {{"x": -1, "y": 0}},
                "kill": "{victim}",
                "start_task": "wiring",
                "timestamp": "2024-05-01T12:00:00.123456789+02:00",
                "drift": 3.5
            }}"#
        );

        let action = ActionMsg::parse(&text, id, Utc::now()).unwrap();
        assert_eq!(action.position, Some(Vector::new(820.5, 300.0)));
        assert_eq!(action.kill, Some(victim));
        assert_eq!(action.start_task.as_deref(), Some("wiring"));
        assert!(action.cancel_task.is_none());
        assert_eq!(action.drift, 3.5);
        assert_eq!(
            action.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            "2024-05-01T10:00:00.123456789Z"
        );
    }

    #[test]
    fn minimal_action_has_no_intents() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"player_id": "{id}", "timestamp": "2024-05-01T12:00:00Z"}}"#);
        let action = ActionMsg::parse(&text, id, Utc::now()).unwrap();
        assert!(action.position.is_none());
        assert!(action.kill.is_none());
        assert_eq!(action.drift, 0.0);
    }

    #[test]
    fn rejects_spoofed_player_id() {
        let text = format!(
            r#"{{"player_id": "{}", "timestamp": "2024-05-01T12:00:00Z"}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            ActionMsg::parse(&text, Uuid::new_v4(), Utc::now()),
            Err(ProtocolError::WrongPlayer { .. })
        ));
    }

    #[test]
    fn rejects_missing_timestamp() {
        let text = format!(r#"{{"player_id": "{}"}}"#, Uuid::new_v4());
        assert!(matches!(
            ActionMsg::parse(&text, Uuid::new_v4(), Utc::now()),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn server_messages_are_tagged() {
        let msg = ServerMsg::Error {
            code: "match_full".into(),
            message: "Game is full".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "match_full");
    }
}
