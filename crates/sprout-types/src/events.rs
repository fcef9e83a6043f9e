use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::RelationKind;

/// What kind of engagement a pushed notification event describes: the four
/// toggle kinds plus the permanent content actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    LikePost,
    LikeComment,
    SavePost,
    Follow,
    Comment,
    Reply,
}

impl From<RelationKind> for EngagementKind {
    fn from(kind: RelationKind) -> Self {
        match kind {
            RelationKind::LikePost => Self::LikePost,
            RelationKind::LikeComment => Self::LikeComment,
            RelationKind::SavePost => Self::SavePost,
            RelationKind::Follow => Self::Follow,
        }
    }
}

/// Events pushed from the server to a live connection.
///
/// Internally tagged so the wire shape is flat:
/// `{"type":"notification","kind":"like_post",...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// An engagement happened. For toggles this is pushed to the
    /// notification recipient on activation and fanned out to the activity
    /// room (minus the actor) on both activation and deactivation; for
    /// comments and replies it is pushed to the recipient on creation.
    Notification {
        kind: EngagementKind,
        actor_id: Uuid,
        entity_id: Uuid,
        active: bool,
    },

    /// A chat message was stored; pushed to every other conversation member.
    ChatMessage {
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    },
}

/// Frames sent from the client over the gateway connection. Untagged: the
/// handshake is distinguished by its `user_id` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Presence handshake, required as the first frame. Announces which user
    /// this connection belongs to and optionally joins a room immediately.
    Hello {
        user_id: Uuid,
        #[serde(default)]
        room: Option<String>,
    },

    /// Join a named room. Membership is connection-scoped: a reconnecting
    /// client must rejoin, nothing is restored automatically.
    JoinRoom { room: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_event_wire_shape_is_flat() {
        let event = RealtimeEvent::Notification {
            kind: RelationKind::LikePost.into(),
            actor_id: Uuid::nil(),
            entity_id: Uuid::nil(),
            active: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["kind"], "like_post");
        assert_eq!(value["active"], true);
    }

    #[test]
    fn hello_room_is_optional() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"user_id":"00000000-0000-0000-0000-000000000001"}"#).unwrap();
        match frame {
            ClientFrame::Hello { room, .. } => assert!(room.is_none()),
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn join_room_frame_is_distinguished_by_fields() {
        let frame: ClientFrame = serde_json::from_str(r#"{"room":"greenhouse"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::JoinRoom { room } if room == "greenhouse"));
    }
}
