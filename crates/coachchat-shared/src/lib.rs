//! Domain types, wire rows and collaborator contracts shared by every
//! coachchat crate.

pub mod backend;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod types;

pub use backend::{AuthProvider, ChatBackend, StaticAuth};
pub use error::{BackendError, ChatError, ValidationError};
pub use retry::RetryPolicy;
pub use types::{LocalUser, Message, MessageId, MessageKind, Topic, TypingStatus, UserId};
