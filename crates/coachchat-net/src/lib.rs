// Realtime feed subscriptions and backend implementations.

pub mod feed;
pub mod memory;
pub mod messages;
pub mod rest;
pub mod transport;

pub use feed::{FeedChannel, FeedStatus, Subscription, SubscriptionState};
pub use memory::{HubCalls, MemoryHub};
pub use messages::{decode_message_event, decode_typing_event};
pub use rest::{RestBackend, RestConfig};
pub use transport::PushTransport;
