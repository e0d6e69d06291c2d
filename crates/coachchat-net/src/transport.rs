use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use coachchat_shared::error::BackendError;
use coachchat_shared::protocol::FeedEvent;
use coachchat_shared::types::Topic;

/// Realtime push transport of the managed backend.
///
/// `open` establishes one subscription to row-level changes on `topic`.
/// The returned stream ending (all senders dropped) means the transport
/// lost the subscription; the feed channel then re-opens it.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn open(&self, topic: Topic) -> Result<mpsc::Receiver<FeedEvent>, BackendError>;
}

#[async_trait]
impl<T: PushTransport + ?Sized> PushTransport for Arc<T> {
    async fn open(&self, topic: Topic) -> Result<mpsc::Receiver<FeedEvent>, BackendError> {
        (**self).open(topic).await
    }
}
