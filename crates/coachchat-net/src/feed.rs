//! Realtime feed subscriptions.
//!
//! Each subscription runs its own pump task: open the topic on the push
//! transport, decode every event into a domain value, hand it to the
//! subscriber callback. The task owns the reconnect policy; when the
//! transport stream ends it re-opens the topic with bounded exponential
//! backoff. Nothing is replayed across a reconnect; callers recover missed
//! rows by reloading a page.
//!
//! Teardown is two-sided. Unsubscribing revokes the callback under the same
//! lock the pump holds while delivering, so once `unsubscribe` returns no
//! callback is running and none will start. It also cancels the pump task.
//! A callback must therefore not unsubscribe its own subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use coachchat_shared::backend::ChatBackend;
use coachchat_shared::error::ChatError;
use coachchat_shared::protocol::FeedEvent;
use coachchat_shared::retry::RetryPolicy;
use coachchat_shared::types::{Message, Topic, TypingStatus};

use crate::messages::{decode_message_event, decode_typing_event};
use crate::transport::PushTransport;

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Active,
    Closed,
}

/// Subscription state transition, published on [`FeedChannel::status_events`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStatus {
    pub topic: Topic,
    pub state: SubscriptionState,
    pub error: Option<ChatError>,
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
type CallbackSlot<T> = Arc<Mutex<Option<Callback<T>>>>;
type Revoke = Box<dyn FnOnce() + Send>;

struct SubscriptionInner {
    topic: Topic,
    state: Mutex<SubscriptionState>,
    failed: AtomicBool,
    cancel: CancellationToken,
    revoke: Mutex<Option<Revoke>>,
    status_tx: broadcast::Sender<FeedStatus>,
}

impl SubscriptionInner {
    fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, state: SubscriptionState, error: Option<ChatError>) {
        {
            let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *guard == SubscriptionState::Closed {
                return;
            }
            *guard = state;
        }
        let _ = self.status_tx.send(FeedStatus {
            topic: self.topic,
            state,
            error,
        });
    }

    fn close(&self) {
        let revoke = self.revoke.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(revoke) = revoke {
            revoke();
            self.cancel.cancel();
            self.transition(SubscriptionState::Closed, None);
            debug!(topic = %self.topic, "Subscription closed");
        }
    }
}

/// Handle to one live subscription. Dropping it unsubscribes.
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.inner.topic
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.state()
    }

    /// The transport could not be (re-)opened within the retry budget.
    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Acquire)
    }

    /// Stop delivery. Idempotent.
    pub fn unsubscribe(&self) {
        self.inner.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.inner.topic)
            .field("state", &self.inner.state())
            .field("failed", &self.is_failed())
            .finish()
    }
}

/// Turns raw events of one topic into values for the callback.
#[async_trait]
trait Decoder: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn decode(&self, event: &FeedEvent) -> Option<Self::Output>;
}

struct MessageDecoder {
    backend: Arc<dyn ChatBackend>,
}

#[async_trait]
impl Decoder for MessageDecoder {
    type Output = Message;

    async fn decode(&self, event: &FeedEvent) -> Option<Message> {
        match decode_message_event(self.backend.as_ref(), event).await {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %event.topic, error = %e, "Dropping malformed message event");
                None
            }
        }
    }
}

struct TypingDecoder;

#[async_trait]
impl Decoder for TypingDecoder {
    type Output = TypingStatus;

    async fn decode(&self, event: &FeedEvent) -> Option<TypingStatus> {
        match decode_typing_event(event) {
            Ok(status) => status,
            Err(e) => {
                warn!(topic = %event.topic, error = %e, "Dropping malformed typing event");
                None
            }
        }
    }
}

/// Owner of the realtime subscriptions of one room.
pub struct FeedChannel {
    transport: Arc<dyn PushTransport>,
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    status_tx: broadcast::Sender<FeedStatus>,
    active: Mutex<HashMap<Topic, Weak<SubscriptionInner>>>,
}

impl FeedChannel {
    pub fn new(transport: Arc<dyn PushTransport>, backend: Arc<dyn ChatBackend>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            transport,
            backend,
            retry: RetryPolicy::default(),
            status_tx,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn status_events(&self) -> broadcast::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Deliver every inserted message. Must be called inside a tokio
    /// runtime.
    pub fn subscribe_messages<F>(&self, on_insert: F) -> Subscription
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let decoder = MessageDecoder {
            backend: Arc::clone(&self.backend),
        };
        self.subscribe(Topic::Messages, decoder, Arc::new(on_insert))
    }

    /// Deliver every typing status change. Must be called inside a tokio
    /// runtime.
    pub fn subscribe_typing<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(TypingStatus) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Typing, TypingDecoder, Arc::new(on_change))
    }

    fn subscribe<D: Decoder>(
        &self,
        topic: Topic,
        decoder: D,
        callback: Callback<D::Output>,
    ) -> Subscription {
        let slot: CallbackSlot<D::Output> = Arc::new(Mutex::new(Some(callback)));
        let revoke_slot = Arc::clone(&slot);
        let revoke: Revoke = Box::new(move || {
            *revoke_slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        });

        let inner = Arc::new(SubscriptionInner {
            topic,
            state: Mutex::new(SubscriptionState::Connecting),
            failed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            revoke: Mutex::new(Some(revoke)),
            status_tx: self.status_tx.clone(),
        });

        // One underlying subscription per topic: a new one replaces the old.
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.insert(topic, Arc::downgrade(&inner))
        };
        if let Some(previous) = previous.and_then(|weak| weak.upgrade()) {
            info!(topic = %topic, "Replacing existing subscription");
            previous.close();
        }

        let pump = Pump {
            transport: Arc::clone(&self.transport),
            decoder,
            slot,
            inner: Arc::clone(&inner),
            retry: self.retry.clone(),
        };
        tokio::spawn(pump.run());

        Subscription { inner }
    }
}

impl Drop for FeedChannel {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(|e| e.into_inner());
        for inner in active.drain().filter_map(|(_, weak)| weak.upgrade()) {
            inner.close();
        }
    }
}

struct Pump<D: Decoder> {
    transport: Arc<dyn PushTransport>,
    decoder: D,
    slot: CallbackSlot<D::Output>,
    inner: Arc<SubscriptionInner>,
    retry: RetryPolicy,
}

impl<D: Decoder> Pump<D> {
    async fn run(self) {
        let topic = self.inner.topic;
        let cancel = self.inner.cancel.clone();
        let mut attempt: u32 = 0;

        'session: loop {
            self.inner.transition(SubscriptionState::Connecting, None);

            let opened = tokio::select! {
                _ = cancel.cancelled() => break 'session,
                opened = self.transport.open(topic) => opened,
            };

            match opened {
                Ok(mut events) => {
                    self.inner.transition(SubscriptionState::Active, None);
                    info!(topic = %topic, attempt, "Feed subscription active");

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break 'session,
                            event = events.recv() => match event {
                                Some(event) => {
                                    attempt = 0;
                                    self.handle(event).await;
                                }
                                None => {
                                    warn!(topic = %topic, "Push stream ended, re-subscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, attempt, error = %e, "Failed to open feed subscription");
                    self.inner.transition(
                        SubscriptionState::Connecting,
                        Some(ChatError::Subscription(e.to_string())),
                    );
                }
            }

            let Some(delay) = self.retry.next_delay(attempt) else {
                error!(topic = %topic, attempts = attempt, "Giving up on feed subscription");
                self.inner.failed.store(true, Ordering::Release);
                self.inner.transition(
                    SubscriptionState::Closed,
                    Some(ChatError::Subscription(format!(
                        "{topic} subscription failed after {attempt} attempts"
                    ))),
                );
                return;
            };
            attempt = attempt.saturating_add(1);
            debug!(topic = %topic, delay_ms = delay.as_millis() as u64, attempt, "Re-subscribe scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break 'session,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(topic = %topic, "Feed pump terminated");
    }

    async fn handle(&self, event: FeedEvent) {
        if event.topic != self.inner.topic {
            debug!(expected = %self.inner.topic, got = %event.topic, "Ignoring event for other topic");
            return;
        }
        let Some(value) = self.decoder.decode(&event).await else {
            return;
        };

        let guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(callback) => callback(value),
            None => debug!(topic = %self.inner.topic, "Subscription revoked, event discarded"),
        }
    }
}
