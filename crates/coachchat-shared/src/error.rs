use thiserror::Error;

/// Errors surfaced to the chat controller and the UI.
///
/// Every repository-level failure is converted into one of these variants
/// before it leaves the pipeline, so the payloads are plain strings and the
/// type stays `Clone` for the controller's `last_error` slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// No active session. Fatal to the operation, never retried locally.
    #[error("Not authenticated: {0}")]
    Auth(String),

    /// Bad input, corrected by the caller.
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Transient failure; the store keeps its last-known-good state.
    #[error("Network error: {0}")]
    Network(String),

    /// The push channel could not be established. Non-fatal.
    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl ChatError {
    /// Whether the failed operation may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether the error should be shown as a warning rather than a failure.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is empty")]
    Empty,

    #[error("message is {len} characters, the limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("rejected by backend: {0}")]
    Rejected(String),
}

/// Errors produced by backend and transport implementations.
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP transport failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status that has no more specific mapping.
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend refused the credentials (or there were none).
    #[error("Unauthorized")]
    Unauthorized,

    /// The backend refused the payload.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// A row or payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Push transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The collaborator has shut down.
    #[error("Channel closed")]
    Closed,
}

impl From<BackendError> for ChatError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthorized => ChatError::Auth("session rejected by backend".into()),
            BackendError::Rejected(reason) => {
                ChatError::Validation(ValidationError::Rejected(reason))
            }
            BackendError::Status { status, body } if status == 401 || status == 403 => {
                ChatError::Auth(format!("status {status}: {body}"))
            }
            other => ChatError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        assert!(matches!(
            ChatError::from(BackendError::Unauthorized),
            ChatError::Auth(_)
        ));
        assert_eq!(
            ChatError::from(BackendError::Rejected("empty".into())),
            ChatError::Validation(ValidationError::Rejected("empty".into()))
        );
        assert!(matches!(
            ChatError::from(BackendError::Status {
                status: 503,
                body: String::new()
            }),
            ChatError::Network(_)
        ));
        assert!(matches!(
            ChatError::from(BackendError::Transport("reset".into())),
            ChatError::Network(_)
        ));
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(ChatError::Network("x".into()).is_retryable());
        assert!(!ChatError::Auth("x".into()).is_retryable());
        assert!(!ChatError::Validation(ValidationError::Empty).is_retryable());
        assert!(ChatError::Subscription("x".into()).is_warning());
    }
}
