//! Translation of raw realtime events into domain values.
//!
//! Message inserts arrive as bare rows without the sender profile. They are
//! reconciled in two phases: decode the partial row, re-fetch the row by id
//! to pick up the joined profile, then merge. A failed or empty re-fetch
//! degrades to the fallback label instead of dropping the message.

use tracing::{debug, warn};

use coachchat_shared::backend::ChatBackend;
use coachchat_shared::constants::FALLBACK_DISPLAY_NAME;
use coachchat_shared::error::BackendError;
use coachchat_shared::protocol::{FeedEvent, FeedEventKind};
use coachchat_shared::types::{Message, Topic, TypingStatus};

/// Decode a `messages` event. Only inserts produce a value: the feed is
/// append-only from the client's point of view.
pub async fn decode_message_event<B: ChatBackend + ?Sized>(
    backend: &B,
    event: &FeedEvent,
) -> Result<Option<Message>, BackendError> {
    if event.topic != Topic::Messages || event.kind != FeedEventKind::Insert {
        return Ok(None);
    }

    let row = event.decode_message_row()?;
    if row.has_profile() {
        return Ok(Some(row.into_message()));
    }

    let id = row.id;
    let partial = row.into_message();
    let message = match backend.fetch_message(id).await {
        Ok(Some(full)) => merge_profile(partial, full),
        Ok(None) => {
            debug!(msg_id = id, "Re-fetch found no row, keeping partial message");
            partial
        }
        Err(e) => {
            warn!(msg_id = id, error = %e, "Re-fetch failed, keeping partial message");
            partial
        }
    };

    Ok(Some(message))
}

/// Decode a `typing_status` event. Deletes carry no new record and are
/// ignored; stale entries expire on their own.
pub fn decode_typing_event(event: &FeedEvent) -> Result<Option<TypingStatus>, BackendError> {
    if event.topic != Topic::Typing || event.kind == FeedEventKind::Delete {
        return Ok(None);
    }
    Ok(Some(event.decode_typing_row()?.into_status()))
}

/// Take the profile columns of the re-fetched row; every other column of
/// the pushed row stays as delivered.
fn merge_profile(mut partial: Message, full: Message) -> Message {
    if full.id != partial.id {
        return partial;
    }
    if full.sender_display_name != FALLBACK_DISPLAY_NAME {
        partial.sender_display_name = full.sender_display_name;
    }
    if full.sender_avatar_url.is_some() {
        partial.sender_avatar_url = full.sender_avatar_url;
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHub;
    use chrono::Utc;
    use coachchat_shared::protocol::MessageRow;
    use coachchat_shared::types::{MessageId, MessageKind};
    use serde_json::json;

    fn insert_event(id: i64, sender: &str) -> FeedEvent {
        let row = MessageRow {
            id,
            sender_id: sender.into(),
            content: "Leg day".into(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            is_read: false,
            profiles: None,
        };
        FeedEvent::new(Topic::Messages, FeedEventKind::Insert, &row).unwrap()
    }

    #[tokio::test]
    async fn test_partial_row_is_enriched_by_refetch() {
        let hub = MemoryHub::new();
        hub.add_profile("coach-1", "Coach Kim", Some("https://cdn.example/kim.png"));
        let stored = hub.seed_message("coach-1", "Leg day");
        let id = stored.id.confirmed().unwrap();

        let msg = decode_message_event(&hub, &insert_event(id, "coach-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.id, MessageId::Confirmed(id));
        assert_eq!(msg.sender_display_name, "Coach Kim");
        assert_eq!(msg.sender_avatar_url.as_deref(), Some("https://cdn.example/kim.png"));
    }

    #[tokio::test]
    async fn test_failed_refetch_degrades_to_fallback() {
        let hub = MemoryHub::new();
        hub.fail_next_lookups(1);

        let msg = decode_message_event(&hub, &insert_event(99, "ghost"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.sender_display_name, FALLBACK_DISPLAY_NAME);
        assert_eq!(msg.content, "Leg day");
    }

    #[tokio::test]
    async fn test_updates_and_foreign_topics_are_ignored() {
        let hub = MemoryHub::new();
        let mut event = insert_event(1, "coach-1");
        event.kind = FeedEventKind::Update;
        assert!(decode_message_event(&hub, &event).await.unwrap().is_none());

        let mut event = insert_event(1, "coach-1");
        event.topic = Topic::Typing;
        assert!(decode_message_event(&hub, &event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let hub = MemoryHub::new();
        let event = FeedEvent {
            topic: Topic::Messages,
            kind: FeedEventKind::Insert,
            record: json!({ "id": "not-a-number" }),
        };
        assert!(decode_message_event(&hub, &event).await.is_err());
    }

    #[test]
    fn test_typing_delete_is_ignored() {
        let event = FeedEvent {
            topic: Topic::Typing,
            kind: FeedEventKind::Delete,
            record: json!({}),
        };
        assert!(decode_typing_event(&event).unwrap().is_none());

        let event = FeedEvent {
            topic: Topic::Typing,
            kind: FeedEventKind::Insert,
            record: json!({
                "user_id": "athlete-2",
                "is_typing": true,
                "updated_at": "2024-03-01T10:00:00Z",
                "display_name": "Lu"
            }),
        };
        let status = decode_typing_event(&event).unwrap().unwrap();
        assert_eq!(status.display_name, "Lu");
    }
}
