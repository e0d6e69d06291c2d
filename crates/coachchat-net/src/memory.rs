//! In-process backend and push transport sharing one room.
//!
//! [`MemoryHub`] implements both [`ChatBackend`] and [`PushTransport`], so a
//! controller wired to it behaves like one talking to the managed backend:
//! inserts are echoed to realtime subscribers as bare rows, lookups join the
//! sender profile. Faults can be injected for every call, which is what the
//! test suites and local demos use it for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use coachchat_shared::backend::ChatBackend;
use coachchat_shared::constants::FEED_CHANNEL_CAPACITY;
use coachchat_shared::error::BackendError;
use coachchat_shared::protocol::{FeedEvent, FeedEventKind, MessageRow, ProfileRow, TypingRow};
use coachchat_shared::types::{Message, MessageKind, Topic, TypingStatus, UserId};

use crate::transport::PushTransport;

/// Calls observed by the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubCalls {
    pub fetch_messages: usize,
    pub fetch_message: usize,
    pub insert_message: usize,
    pub typing_upserts: Vec<(UserId, bool)>,
    pub message_opens: usize,
    pub typing_opens: usize,
}

#[derive(Default)]
struct HubState {
    rows: Vec<MessageRow>,
    next_id: i64,
    profiles: HashMap<String, ProfileRow>,
    subscribers: HashMap<Topic, Vec<mpsc::Sender<FeedEvent>>>,
    held_echoes: Vec<FeedEvent>,
    hold_echoes: bool,
    drop_profile_joins: bool,
    unauthorized: bool,
    fail_loads: u32,
    fail_lookups: u32,
    fail_inserts: u32,
    fail_opens: u32,
    ack_delay: Option<Duration>,
    calls: HubCalls,
}

impl HubState {
    fn joined(&self, row: &MessageRow) -> Message {
        let mut row = row.clone();
        if !self.drop_profile_joins {
            row.profiles = self.profiles.get(&row.sender_id).cloned();
        }
        row.into_message()
    }

    fn insert_row(&mut self, sender_id: &str, content: &str, kind: MessageKind) -> MessageRow {
        self.next_id += 1;
        let row = MessageRow {
            id: self.next_id,
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            kind,
            created_at: Utc::now(),
            is_read: false,
            profiles: None,
        };
        self.rows.push(row.clone());
        row
    }

    fn echo(&mut self, event: FeedEvent) {
        if self.hold_echoes {
            self.held_echoes.push(event);
        } else {
            self.publish(event);
        }
    }

    fn publish(&mut self, event: FeedEvent) {
        let Some(senders) = self.subscribers.get_mut(&event.topic) else {
            return;
        };
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic = %event.topic, "Subscriber lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn typing_display_name(&self, user_id: &str) -> Option<String> {
        self.profiles
            .get(user_id)
            .and_then(|p| p.full_name.clone())
    }
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Room contents
    // ------------------------------------------------------------------

    pub fn add_profile(&self, user_id: &str, full_name: &str, avatar_url: Option<&str>) {
        self.state().profiles.insert(
            user_id.to_string(),
            ProfileRow {
                full_name: Some(full_name.to_string()),
                avatar_url: avatar_url.map(str::to_string),
            },
        );
    }

    /// Store a message without pushing it to subscribers (history).
    pub fn seed_message(&self, sender_id: &str, content: &str) -> Message {
        let mut state = self.state();
        let row = state.insert_row(sender_id, content, MessageKind::Text);
        state.joined(&row)
    }

    /// Another participant inserts a message; subscribers get the echo.
    pub fn push_remote_message(&self, sender_id: &str, content: &str) -> Message {
        let mut state = self.state();
        let row = state.insert_row(sender_id, content, MessageKind::Text);
        match FeedEvent::new(Topic::Messages, FeedEventKind::Insert, &row) {
            Ok(event) => state.echo(event),
            Err(e) => warn!(error = %e, "Failed to encode echo"),
        }
        state.joined(&row)
    }

    /// Another participant's typing state changes.
    pub fn push_typing(&self, user_id: &str, is_typing: bool) {
        let mut state = self.state();
        let row = TypingRow {
            user_id: user_id.to_string(),
            is_typing,
            updated_at: Utc::now(),
            display_name: state.typing_display_name(user_id),
            profiles: None,
        };
        match FeedEvent::new(Topic::Typing, FeedEventKind::Update, &row) {
            Ok(event) => state.publish(event),
            Err(e) => warn!(error = %e, "Failed to encode typing event"),
        }
    }

    /// Push an arbitrary event, malformed ones included.
    pub fn push_raw(&self, event: FeedEvent) {
        self.state().publish(event);
    }

    /// Every stored message, joined, in insertion order.
    pub fn rows(&self) -> Vec<Message> {
        let state = self.state();
        state.rows.iter().map(|row| state.joined(row)).collect()
    }

    // ------------------------------------------------------------------
    // Transport control
    // ------------------------------------------------------------------

    /// Drop every open stream on `topic`, as a transport-level disconnect.
    pub fn disconnect(&self, topic: Topic) {
        let dropped = self.state().subscribers.remove(&topic).map_or(0, |s| s.len());
        debug!(topic = %topic, dropped, "Simulated transport disconnect");
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.state()
            .subscribers
            .get(&topic)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Queue echoes instead of publishing them until [`release_echoes`](Self::release_echoes).
    pub fn hold_echoes(&self, hold: bool) {
        self.state().hold_echoes = hold;
    }

    pub fn release_echoes(&self) {
        let mut state = self.state();
        state.hold_echoes = false;
        let held = std::mem::take(&mut state.held_echoes);
        for event in held {
            state.publish(event);
        }
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    pub fn fail_next_loads(&self, n: u32) {
        self.state().fail_loads = n;
    }

    pub fn fail_next_lookups(&self, n: u32) {
        self.state().fail_lookups = n;
    }

    pub fn fail_next_inserts(&self, n: u32) {
        self.state().fail_inserts = n;
    }

    pub fn fail_next_opens(&self, n: u32) {
        self.state().fail_opens = n;
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.state().unauthorized = unauthorized;
    }

    /// Lookups and acknowledgements come back without the profile join.
    pub fn drop_profile_joins(&self, drop: bool) {
        self.state().drop_profile_joins = drop;
    }

    /// Delay the insert acknowledgement; the echo is published first.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state().ack_delay = delay;
    }

    pub fn calls(&self) -> HubCalls {
        self.state().calls.clone()
    }
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ChatBackend for MemoryHub {
    async fn fetch_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>, BackendError> {
        let mut state = self.state();
        state.calls.fetch_messages += 1;
        if state.unauthorized {
            return Err(BackendError::Unauthorized);
        }
        if take_fault(&mut state.fail_loads) {
            return Err(BackendError::Transport("injected load failure".into()));
        }

        let mut rows: Vec<&MessageRow> = state.rows.iter().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| state.joined(row))
            .collect())
    }

    async fn fetch_message(&self, id: i64) -> Result<Option<Message>, BackendError> {
        let mut state = self.state();
        state.calls.fetch_message += 1;
        if state.unauthorized {
            return Err(BackendError::Unauthorized);
        }
        if take_fault(&mut state.fail_lookups) {
            return Err(BackendError::Transport("injected lookup failure".into()));
        }
        Ok(state
            .rows
            .iter()
            .find(|row| row.id == id)
            .map(|row| state.joined(row)))
    }

    async fn insert_message(
        &self,
        sender_id: &UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, BackendError> {
        let (ack, delay) = {
            let mut state = self.state();
            state.calls.insert_message += 1;
            if state.unauthorized {
                return Err(BackendError::Unauthorized);
            }
            if take_fault(&mut state.fail_inserts) {
                return Err(BackendError::Transport("injected insert failure".into()));
            }
            if content.trim().is_empty() {
                return Err(BackendError::Rejected("content must not be empty".into()));
            }

            let row = state.insert_row(sender_id.as_str(), content, kind);
            let event = FeedEvent::new(Topic::Messages, FeedEventKind::Insert, &row)?;
            state.echo(event);
            (state.joined(&row), state.ack_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ack)
    }

    async fn upsert_typing_status(
        &self,
        user_id: &UserId,
        is_typing: bool,
    ) -> Result<TypingStatus, BackendError> {
        let mut state = self.state();
        state.calls.typing_upserts.push((user_id.clone(), is_typing));
        if state.unauthorized {
            return Err(BackendError::Unauthorized);
        }

        let row = TypingRow {
            user_id: user_id.to_string(),
            is_typing,
            updated_at: Utc::now(),
            display_name: state.typing_display_name(user_id.as_str()),
            profiles: None,
        };
        let event = FeedEvent::new(Topic::Typing, FeedEventKind::Update, &row)?;
        state.publish(event);
        Ok(row.into_status())
    }
}

#[async_trait]
impl PushTransport for MemoryHub {
    async fn open(&self, topic: Topic) -> Result<mpsc::Receiver<FeedEvent>, BackendError> {
        let mut state = self.state();
        match topic {
            Topic::Messages => state.calls.message_opens += 1,
            Topic::Typing => state.calls.typing_opens += 1,
        }
        if state.unauthorized {
            return Err(BackendError::Unauthorized);
        }
        if take_fault(&mut state.fail_opens) {
            return Err(BackendError::Transport("injected open failure".into()));
        }

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        state.subscribers.entry(topic).or_default().push(tx);
        Ok(rx)
    }
}
