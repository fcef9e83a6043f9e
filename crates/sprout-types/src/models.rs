use serde::{Deserialize, Serialize};

/// The four toggleable relationship kinds. Absence of the stored row is the
/// "off" state; there is never a soft-deleted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    LikePost,
    LikeComment,
    SavePost,
    Follow,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LikePost => "like_post",
            Self::LikeComment => "like_comment",
            Self::SavePost => "save_post",
            Self::Follow => "follow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like_post" => Some(Self::LikePost),
            "like_comment" => Some(Self::LikeComment),
            "save_post" => Some(Self::SavePost),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }

    /// What the target_id of a toggle refers to.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::LikePost | Self::SavePost => EntityType::Post,
            Self::LikeComment => EntityType::Comment,
            Self::Follow => EntityType::User,
        }
    }

    /// The notification type a toggle-on produces, if any.
    /// Saving a post is a pure relationship change with no notification.
    pub fn notification_type(&self) -> Option<NotificationType> {
        match self {
            Self::LikePost | Self::LikeComment => Some(NotificationType::Like),
            Self::Follow => Some(NotificationType::Follow),
            Self::SavePost => None,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification types. `Like` and `Follow` mirror a relationship row and are
/// retracted when it is deleted; `Comment` and `Reply` are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Follow,
    Comment,
    Reply,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Follow => "follow",
            Self::Comment => "comment",
            Self::Reply => "reply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "follow" => Some(Self::Follow),
            "comment" => Some(Self::Comment),
            "reply" => Some(Self::Reply),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification's entity_id points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Post,
    Comment,
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(Self::Post),
            "comment" => Some(Self::Comment),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            RelationKind::LikePost,
            RelationKind::LikeComment,
            RelationKind::SavePost,
            RelationKind::Follow,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RelationKind::parse("like"), None);
    }

    #[test]
    fn save_post_has_no_notification() {
        assert_eq!(RelationKind::SavePost.notification_type(), None);
        assert_eq!(
            RelationKind::Follow.notification_type(),
            Some(NotificationType::Follow)
        );
    }
}
