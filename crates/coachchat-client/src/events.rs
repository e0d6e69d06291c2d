use serde::Serialize;

use coachchat_shared::error::ChatError;
use coachchat_shared::types::{Message, TypingStatus};

pub const EVENT_MESSAGES_CHANGED: &str = "messages-changed";
pub const EVENT_TYPING_CHANGED: &str = "typing-changed";
pub const EVENT_CHAT_ERROR: &str = "chat-error";

/// Change notification broadcast by the controller. Receivers re-read the
/// snapshot they care about.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessagesChanged,
    TypingChanged,
    Error(ChatError),
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessagesChanged => EVENT_MESSAGES_CHANGED,
            Self::TypingChanged => EVENT_TYPING_CHANGED,
            Self::Error(_) => EVENT_CHAT_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
    pub sender_display_name: String,
    pub sender_avatar_url: Option<String>,
    pub is_read: bool,
    pub pending: bool,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            sender_id: m.sender_id.to_string(),
            content: m.content.clone(),
            kind: m.kind.as_str().to_string(),
            created_at: m.created_at.to_rfc3339(),
            sender_display_name: m.sender_display_name.clone(),
            sender_avatar_url: m.sender_avatar_url.clone(),
            is_read: m.is_read,
            pending: m.is_pending(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingDto {
    pub user_id: String,
    pub display_name: String,
}

impl From<&TypingStatus> for TypingDto {
    fn from(s: &TypingStatus) -> Self {
        Self {
            user_id: s.user_id.to_string(),
            display_name: s.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub is_warning: bool,
}

impl From<&ChatError> for ErrorPayload {
    fn from(e: &ChatError) -> Self {
        let kind = match e {
            ChatError::Auth(_) => "auth",
            ChatError::Validation(_) => "validation",
            ChatError::Network(_) => "network",
            ChatError::Subscription(_) => "subscription",
        };
        Self {
            kind: kind.to_string(),
            message: e.to_string(),
            is_warning: e.is_warning(),
        }
    }
}
