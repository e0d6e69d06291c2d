use tracing::{debug, warn};

use coachchat_shared::backend::ChatBackend;
use coachchat_shared::error::ChatError;
use coachchat_shared::types::Message;

/// Fetch one page of the room from the backend.
///
/// Backend failures are converted into [`ChatError`] here; nothing is
/// written to any store, so a failed fetch leaves the caller's state at its
/// last-known-good value. The page comes back sorted by the ordering key
/// and free of duplicate ids, whatever order the backend used.
pub async fn fetch_page<B: ChatBackend + ?Sized>(
    backend: &B,
    limit: u32,
    offset: u32,
) -> Result<Vec<Message>, ChatError> {
    let mut page = backend
        .fetch_messages(limit, offset)
        .await
        .map_err(|e| {
            warn!(limit, offset, error = %e, "Failed to fetch message page");
            ChatError::from(e)
        })?;

    page.sort_by(Message::cmp_order);
    page.dedup_by_key(|m| m.id);

    debug!(limit, offset, count = page.len(), "Fetched message page");
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use coachchat_shared::error::BackendError;
    use coachchat_shared::types::{MessageId, MessageKind, TypingStatus, UserId};

    struct FixedBackend {
        result: fn() -> Result<Vec<Message>, BackendError>,
    }

    fn row(id: i64, secs: i64) -> Message {
        Message {
            id: MessageId::Confirmed(id),
            sender_id: UserId::new("coach"),
            content: format!("m{id}"),
            kind: MessageKind::Text,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            sender_display_name: "Coach".into(),
            sender_avatar_url: None,
            is_read: false,
        }
    }

    #[async_trait]
    impl ChatBackend for FixedBackend {
        async fn fetch_messages(&self, _: u32, _: u32) -> Result<Vec<Message>, BackendError> {
            (self.result)()
        }

        async fn fetch_message(&self, _: i64) -> Result<Option<Message>, BackendError> {
            Ok(None)
        }

        async fn insert_message(
            &self,
            _: &UserId,
            _: &str,
            _: MessageKind,
        ) -> Result<Message, BackendError> {
            Err(BackendError::Closed)
        }

        async fn upsert_typing_status(
            &self,
            _: &UserId,
            _: bool,
        ) -> Result<TypingStatus, BackendError> {
            Err(BackendError::Closed)
        }
    }

    #[tokio::test]
    async fn test_page_is_sorted_and_deduplicated() {
        let backend = FixedBackend {
            result: || Ok(vec![row(3, 30), row(1, 10), row(3, 30), row(2, 20)]),
        };
        let page = fetch_page(&backend, 50, 0).await.unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![
                MessageId::Confirmed(1),
                MessageId::Confirmed(2),
                MessageId::Confirmed(3)
            ]
        );
    }

    #[tokio::test]
    async fn test_errors_are_converted() {
        let backend = FixedBackend {
            result: || Err(BackendError::Unauthorized),
        };
        assert!(matches!(
            fetch_page(&backend, 50, 0).await,
            Err(ChatError::Auth(_))
        ));

        let backend = FixedBackend {
            result: || Err(BackendError::Transport("connection reset".into())),
        };
        assert!(matches!(
            fetch_page(&backend, 50, 0).await,
            Err(ChatError::Network(_))
        ));
    }
}
