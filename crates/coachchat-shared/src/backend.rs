//! Contracts of the external collaborators the chat engine talks to.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{LocalUser, Message, MessageKind, TypingStatus, UserId};

/// Persistence side of the managed message backend.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// One page of the room, ascending by creation time.
    async fn fetch_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>, BackendError>;

    /// A single row with the sender profile joined, if it exists.
    async fn fetch_message(&self, id: i64) -> Result<Option<Message>, BackendError>;

    /// Insert a message and return the authoritative row.
    async fn insert_message(
        &self,
        sender_id: &UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, BackendError>;

    async fn upsert_typing_status(
        &self,
        user_id: &UserId,
        is_typing: bool,
    ) -> Result<TypingStatus, BackendError>;
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for Arc<T> {
    async fn fetch_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>, BackendError> {
        (**self).fetch_messages(limit, offset).await
    }

    async fn fetch_message(&self, id: i64) -> Result<Option<Message>, BackendError> {
        (**self).fetch_message(id).await
    }

    async fn insert_message(
        &self,
        sender_id: &UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, BackendError> {
        (**self).insert_message(sender_id, content, kind).await
    }

    async fn upsert_typing_status(
        &self,
        user_id: &UserId,
        is_typing: bool,
    ) -> Result<TypingStatus, BackendError> {
        (**self).upsert_typing_status(user_id, is_typing).await
    }
}

/// Source of the authenticated session.
pub trait AuthProvider: Send + Sync + 'static {
    /// The signed-in user, or `None` when there is no active session.
    fn current_user(&self) -> Option<LocalUser>;
}

/// Session holder the host app updates on sign-in and sign-out.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Arc<RwLock<Option<LocalUser>>>,
}

impl StaticAuth {
    pub fn new(user: Option<LocalUser>) -> Self {
        Self {
            user: Arc::new(RwLock::new(user)),
        }
    }

    pub fn signed_in(user: LocalUser) -> Self {
        Self::new(Some(user))
    }

    pub fn set_user(&self, user: Option<LocalUser>) {
        let mut guard = self.user.write().unwrap_or_else(|e| e.into_inner());
        *guard = user;
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<LocalUser> {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_auth_sign_out() {
        let auth = StaticAuth::signed_in(LocalUser::new("u1", "Ana"));
        assert_eq!(auth.current_user().map(|u| u.id), Some(UserId::new("u1")));

        let shared = auth.clone();
        shared.set_user(None);
        assert!(auth.current_user().is_none());
    }
}
