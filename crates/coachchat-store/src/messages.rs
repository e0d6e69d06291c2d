//! Ordered, deduplicated message log.
//!
//! Entries are kept sorted by `(created_at, id)` on every mutation, so a
//! reader never observes an unsorted sequence no matter in which order
//! events were processed.
//!
//! Locally authored messages enter as `Pending` placeholders. A placeholder
//! leaves the log in exactly one of three ways:
//! - the backend acknowledgement replaces it ([`MessageStore::replace_placeholder`]),
//! - the realtime echo of the same insert absorbs it ([`MessageStore::append`]),
//! - a failed send rolls it back ([`MessageStore::remove_placeholder`]).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use coachchat_shared::constants::ECHO_MATCH_WINDOW_SECS;
use coachchat_shared::types::{Message, MessageId, UserId};

/// What an echo needs to be matched against a placeholder.
#[derive(Debug, Clone)]
struct PendingEntry {
    sender_id: UserId,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MessageStore {
    entries: Vec<Message>,
    confirmed: HashSet<i64>,
    pending: HashMap<Uuid, PendingEntry>,
    /// Placeholders taken over by a realtime echo before the backend
    /// acknowledged them, mapped to the authoritative id.
    absorbed: HashMap<Uuid, i64>,
    echo_window: Duration,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_echo_window(Duration::seconds(ECHO_MATCH_WINDOW_SECS))
    }

    pub fn with_echo_window(echo_window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            confirmed: HashSet::new(),
            pending: HashMap::new(),
            absorbed: HashMap::new(),
            echo_window,
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The visible log, sorted by the ordering key.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of backend-confirmed rows (the offset of the next page).
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is visible, either directly or through the confirmed
    /// row that took over its placeholder.
    pub fn contains(&self, id: &MessageId) -> bool {
        match id {
            MessageId::Confirmed(id) => self.confirmed.contains(id),
            MessageId::Pending(placeholder) => {
                self.pending.contains_key(placeholder)
                    || self
                        .absorbed
                        .get(placeholder)
                        .is_some_and(|id| self.confirmed.contains(id))
            }
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a message unless it is already present. Returns whether the
    /// visible log changed.
    ///
    /// A confirmed message that matches a pending placeholder of the same
    /// sender (same content, timestamps within the echo window) takes the
    /// placeholder's place instead of adding a second row.
    pub fn append(&mut self, message: Message) -> bool {
        match message.id {
            MessageId::Pending(_) => self.insert_pending(message),
            MessageId::Confirmed(id) => {
                if self.confirmed.contains(&id) {
                    trace!(msg_id = id, "Ignoring duplicate message");
                    return false;
                }

                if let Some(placeholder) = self.match_echo(&message) {
                    debug!(
                        msg_id = id,
                        placeholder = %placeholder,
                        "Echo absorbed pending message"
                    );
                    self.pending.remove(&placeholder);
                    self.remove_entry(&MessageId::Pending(placeholder));
                    self.absorbed.insert(placeholder, id);
                }

                self.confirmed.insert(id);
                self.insert_sorted(message);
                true
            }
        }
    }

    /// Insert a locally authored placeholder.
    pub fn insert_pending(&mut self, message: Message) -> bool {
        let Some(placeholder) = message.id.placeholder() else {
            return self.append(message);
        };
        if self.pending.contains_key(&placeholder) || self.absorbed.contains_key(&placeholder) {
            return false;
        }

        self.pending.insert(
            placeholder,
            PendingEntry {
                sender_id: message.sender_id.clone(),
                content: message.content.clone(),
                created_at: message.created_at,
            },
        );
        self.insert_sorted(message);
        true
    }

    /// Swap a placeholder for its authoritative row.
    ///
    /// The acknowledgement is canonical: if an echo already took over the
    /// placeholder, the echoed row is overwritten. If the placeholder is
    /// gone entirely, this behaves like [`append`](Self::append).
    pub fn replace_placeholder(&mut self, placeholder: Uuid, authoritative: Message) -> bool {
        let Some(id) = authoritative.id.confirmed() else {
            return self.append(authoritative);
        };

        if self.pending.remove(&placeholder).is_some() {
            self.remove_entry(&MessageId::Pending(placeholder));
            if self.confirmed.contains(&id) {
                self.remove_entry(&authoritative.id);
            }
            self.confirmed.insert(id);
            self.insert_sorted(authoritative);
            debug!(msg_id = id, placeholder = %placeholder, "Placeholder reconciled");
            return true;
        }

        if let Some(absorbed_id) = self.absorbed.remove(&placeholder) {
            if absorbed_id != id {
                // The echo belonged to another insert; both rows stay.
                debug!(
                    msg_id = id,
                    echoed = absorbed_id,
                    "Echo matched a different insert"
                );
            }
            if self.confirmed.contains(&id) {
                self.remove_entry(&authoritative.id);
            }
            self.confirmed.insert(id);
            self.insert_sorted(authoritative);
            return true;
        }

        debug!(msg_id = id, placeholder = %placeholder, "Placeholder already gone, appending");
        self.append(authoritative)
    }

    /// Roll back a failed send. Only a placeholder that is still pending is
    /// removed; one already absorbed by an echo is backed by a real row.
    pub fn remove_placeholder(&mut self, placeholder: Uuid) -> bool {
        if self.pending.remove(&placeholder).is_some() {
            self.remove_entry(&MessageId::Pending(placeholder));
            debug!(placeholder = %placeholder, "Pending message rolled back");
            return true;
        }
        self.absorbed.remove(&placeholder);
        false
    }

    /// Merge a fetched page. Returns how many rows became visible.
    pub fn merge_page(&mut self, page: Vec<Message>) -> usize {
        page.into_iter()
            .map(|message| self.append(message))
            .filter(|changed| *changed)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.confirmed.clear();
        self.pending.clear();
        self.absorbed.clear();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn insert_sorted(&mut self, message: Message) {
        let at = self
            .entries
            .partition_point(|m| m.cmp_order(&message).is_le());
        self.entries.insert(at, message);
    }

    fn remove_entry(&mut self, id: &MessageId) -> Option<Message> {
        let at = self.entries.iter().position(|m| &m.id == id)?;
        Some(self.entries.remove(at))
    }

    /// Closest pending placeholder this confirmed message could be the
    /// echo of.
    fn match_echo(&self, message: &Message) -> Option<Uuid> {
        self.pending
            .iter()
            .filter(|(_, p)| p.sender_id == message.sender_id && p.content == message.content)
            .map(|(placeholder, p)| {
                let distance = if message.created_at >= p.created_at {
                    message.created_at - p.created_at
                } else {
                    p.created_at - message.created_at
                };
                (*placeholder, distance)
            })
            .filter(|(_, distance)| *distance <= self.echo_window)
            .min_by_key(|(_, distance)| *distance)
            .map(|(placeholder, _)| placeholder)
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
