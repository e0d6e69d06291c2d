use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::FALLBACK_DISPLAY_NAME;
use crate::error::BackendError;
use crate::types::{Message, MessageId, MessageKind, Topic, TypingStatus, UserId};

/// Row of the `messages` table, optionally joined with the sender profile.
///
/// Realtime insert payloads carry the bare row (no `profiles`); REST
/// selects carry the join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub content: String,
    #[serde(default, rename = "message_type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<ProfileRow>,
}

/// Columns joined from the user-profile collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProfileRow {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ProfileRow {
    fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl MessageRow {
    /// Whether the sender profile was joined into this row.
    pub fn has_profile(&self) -> bool {
        self.profiles
            .as_ref()
            .and_then(ProfileRow::display_name)
            .is_some()
    }

    /// Convert into a domain message, degrading to the fallback label when
    /// the profile join is missing.
    pub fn into_message(self) -> Message {
        let (display_name, avatar_url) = match &self.profiles {
            Some(profile) => (
                profile
                    .display_name()
                    .unwrap_or(FALLBACK_DISPLAY_NAME)
                    .to_string(),
                profile.avatar_url.clone(),
            ),
            None => (FALLBACK_DISPLAY_NAME.to_string(), None),
        };

        Message {
            id: MessageId::Confirmed(self.id),
            sender_id: UserId(self.sender_id),
            content: self.content,
            kind: self.kind,
            created_at: self.created_at,
            sender_display_name: display_name,
            sender_avatar_url: avatar_url,
            is_read: self.is_read,
        }
    }
}

/// Row of the `typing_status` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingRow {
    pub user_id: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<ProfileRow>,
}

impl TypingRow {
    pub fn into_status(self) -> TypingStatus {
        let display_name = self
            .display_name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                self.profiles
                    .as_ref()
                    .and_then(ProfileRow::display_name)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());

        TypingStatus {
            user_id: UserId(self.user_id),
            is_typing: self.is_typing,
            updated_at: self.updated_at,
            display_name,
        }
    }
}

/// Body of a message insert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageRow {
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
}

/// Body of a typing status upsert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingUpsertRow {
    pub user_id: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedEventKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change pushed by the realtime transport.
///
/// The record is kept as loosely typed JSON until the feed channel decodes
/// it for the subscribed topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub topic: Topic,
    #[serde(rename = "eventType")]
    pub kind: FeedEventKind,
    #[serde(rename = "new")]
    pub record: serde_json::Value,
}

impl FeedEvent {
    pub fn new<T: Serialize>(
        topic: Topic,
        kind: FeedEventKind,
        record: &T,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            topic,
            kind,
            record: serde_json::to_value(record)?,
        })
    }

    pub fn decode_message_row(&self) -> Result<MessageRow, BackendError> {
        Ok(MessageRow::deserialize(&self.record)?)
    }

    pub fn decode_typing_row(&self) -> Result<TypingRow, BackendError> {
        Ok(TypingRow::deserialize(&self.record)?)
    }
}
