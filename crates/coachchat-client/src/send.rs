//! Outbound message pipeline.
//!
//! A send moves through `Composing -> Validating -> OptimisticallyInserted`
//! and ends `Reconciled` or `Failed`. Validation and the session check run
//! before anything touches the store or the network.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use coachchat_shared::backend::{AuthProvider, ChatBackend};
use coachchat_shared::constants::MAX_MESSAGE_CHARS;
use coachchat_shared::error::{ChatError, ValidationError};
use coachchat_shared::types::{LocalUser, Message, MessageId, MessageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Composing,
    Validating,
    OptimisticallyInserted,
    Reconciled,
    Failed,
}

/// Trim `content` and check it against the length limit.
pub fn validate(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// A send whose placeholder is already visible.
///
/// Awaiting it yields the authoritative row or the error that rolled the
/// placeholder back. Dropping it does not cancel the send.
#[derive(Debug)]
pub struct PendingSend {
    placeholder: MessageId,
    stage: Arc<Mutex<SendStage>>,
    handle: JoinHandle<Result<Message, ChatError>>,
}

impl PendingSend {
    pub(crate) fn new(
        placeholder: MessageId,
        stage: Arc<Mutex<SendStage>>,
        handle: JoinHandle<Result<Message, ChatError>>,
    ) -> Self {
        Self {
            placeholder,
            stage,
            handle,
        }
    }

    pub fn placeholder(&self) -> MessageId {
        self.placeholder
    }

    pub fn stage(&self) -> SendStage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn outcome(self) -> Result<Message, ChatError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::Network(format!("send task aborted: {e}"))),
        }
    }
}

/// A validated message ready for optimistic insertion.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub author: LocalUser,
    pub local_id: Uuid,
    pub placeholder: Message,
}

/// Validation, authentication and backend insert of outbound messages.
pub struct SendPipeline {
    backend: Arc<dyn ChatBackend>,
    auth: Arc<dyn AuthProvider>,
}

impl SendPipeline {
    pub fn new(backend: Arc<dyn ChatBackend>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { backend, auth }
    }

    pub fn current_user(&self) -> Result<LocalUser, ChatError> {
        self.auth
            .current_user()
            .ok_or_else(|| ChatError::Auth("no active session".into()))
    }

    /// Validate `content` and build the placeholder for it.
    pub fn prepare(
        &self,
        content: &str,
        kind: MessageKind,
        stage: &Mutex<SendStage>,
    ) -> Result<Outbound, ChatError> {
        set_stage(stage, SendStage::Validating);
        let result = validate(content)
            .map_err(ChatError::from)
            .and_then(|content| {
                let author = self.current_user()?;
                let local_id = Uuid::new_v4();
                let placeholder = Message {
                    id: MessageId::Pending(local_id),
                    ..Message::pending(&author, content, kind)
                };
                Ok(Outbound {
                    author,
                    local_id,
                    placeholder,
                })
            });

        if let Err(e) = &result {
            debug!(error = %e, "Send refused before insert");
            set_stage(stage, SendStage::Failed);
        }
        result
    }

    /// Write the message to the backend.
    pub async fn submit(&self, outbound: &Outbound) -> Result<Message, ChatError> {
        let placeholder = &outbound.placeholder;
        self.backend
            .insert_message(&outbound.author.id, &placeholder.content, placeholder.kind)
            .await
            .map_err(|e| {
                warn!(placeholder = %placeholder.id, error = %e, "Message insert failed");
                ChatError::from(e)
            })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }
}

pub(crate) fn set_stage(stage: &Mutex<SendStage>, next: SendStage) {
    *stage.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachchat_net::MemoryHub;
    use coachchat_shared::backend::StaticAuth;

    fn pipeline(hub: &MemoryHub, signed_in: bool) -> SendPipeline {
        let user = signed_in.then(|| LocalUser::new("athlete-1", "Ana"));
        SendPipeline::new(Arc::new(hub.clone()), Arc::new(StaticAuth::new(user)))
    }

    #[test]
    fn test_validate_trims_and_limits() {
        assert_eq!(validate("  hi \n").unwrap(), "hi");
        assert_eq!(validate(""), Err(ValidationError::Empty));
        assert_eq!(validate("   "), Err(ValidationError::Empty));
        assert!(validate(&"a".repeat(1000)).is_ok());
        assert_eq!(
            validate(&"a".repeat(1001)),
            Err(ValidationError::TooLong { len: 1001, max: 1000 })
        );
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        assert!(validate(&"é".repeat(1000)).is_ok());
        assert!(validate(&"💪".repeat(1000)).is_ok());
    }

    #[test]
    fn test_prepare_checks_validation_before_auth() {
        let hub = MemoryHub::new();
        let stage = Mutex::new(SendStage::Composing);

        let err = pipeline(&hub, false)
            .prepare("  ", MessageKind::Text, &stage)
            .unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::Empty));

        let err = pipeline(&hub, false)
            .prepare("hello", MessageKind::Text, &stage)
            .unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
        assert_eq!(*stage.lock().unwrap(), SendStage::Failed);
        assert_eq!(hub.calls().insert_message, 0);
    }

    #[tokio::test]
    async fn test_submit_returns_authoritative_row() {
        let hub = MemoryHub::new();
        hub.add_profile("athlete-1", "Ana", None);
        let pipeline = pipeline(&hub, true);
        let stage = Mutex::new(SendStage::Composing);

        let outbound = pipeline.prepare(" hi ", MessageKind::Text, &stage).unwrap();
        assert_eq!(outbound.placeholder.id, MessageId::Pending(outbound.local_id));
        assert_eq!(outbound.placeholder.content, "hi");

        let row = pipeline.submit(&outbound).await.unwrap();
        assert!(!row.is_pending());
        assert_eq!(row.sender_display_name, "Ana");
    }
}
