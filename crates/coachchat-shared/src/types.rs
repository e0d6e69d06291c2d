use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MESSAGES_TABLE, TYPING_TABLE};

// User identity = backend auth user id (opaque string, usually a UUID)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message within the room.
///
/// `Confirmed` ids are assigned by the backend. `Pending` ids are local
/// placeholders for optimistic sends and never leave the process. Variant
/// order matters: at equal timestamps confirmed rows sort first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    Confirmed(i64),
    Pending(Uuid),
}

impl MessageId {
    pub fn new_pending() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn confirmed(&self) -> Option<i64> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    pub fn placeholder(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(_) => None,
            Self::Pending(uuid) => Some(*uuid),
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id}"),
            Self::Pending(uuid) => write!(f, "pending:{uuid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

/// A single chat message as shown to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub sender_display_name: String,
    pub sender_avatar_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Build a placeholder for a locally authored message.
    pub fn pending(author: &LocalUser, content: String, kind: MessageKind) -> Self {
        Self {
            id: MessageId::new_pending(),
            sender_id: author.id.clone(),
            content,
            kind,
            created_at: Utc::now(),
            sender_display_name: author.display_name.clone(),
            sender_avatar_url: author.avatar_url.clone(),
            is_read: true,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    /// Compare by the room ordering key `(created_at, id)`.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// The latest "is typing" signal of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub user_id: UserId,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
    pub display_name: String,
}

/// The authenticated user of this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl LocalUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Realtime topics the feed channel can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Typing,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => MESSAGES_TABLE,
            Self::Typing => TYPING_TABLE,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
