//! "Who is typing" state.
//!
//! Remote signals expire lazily: an entry older than the freshness window is
//! treated as absent on read, no timer is involved. Age is measured from
//! when the signal was received locally, so clock skew between devices does
//! not hide or pin an indicator.
//!
//! Outbound signals are debounced: rapid `set_local_typing(true)` calls
//! collapse into at most one update per debounce window, the last value
//! being delivered later through [`TypingCoordinator::flush_local`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use coachchat_shared::constants::{TYPING_DEBOUNCE_MS, TYPING_FRESHNESS_MS};
use coachchat_shared::types::{TypingStatus, UserId};

/// What to do with a local typing change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTyping {
    /// Broadcast this value now.
    Send(bool),
    /// Call `flush_local` after this delay.
    Defer(Duration),
    /// Nothing to broadcast.
    Skip,
}

#[derive(Debug, Clone)]
struct RemoteEntry {
    status: TypingStatus,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct LocalState {
    broadcast: bool,
    last_sent_at: Option<Instant>,
    deferred: Option<bool>,
}

#[derive(Debug)]
pub struct TypingCoordinator {
    freshness: Duration,
    debounce: Duration,
    remote: HashMap<UserId, RemoteEntry>,
    local: LocalState,
}

impl TypingCoordinator {
    pub fn new() -> Self {
        Self::with_windows(
            Duration::from_millis(TYPING_FRESHNESS_MS),
            Duration::from_millis(TYPING_DEBOUNCE_MS),
        )
    }

    pub fn with_windows(freshness: Duration, debounce: Duration) -> Self {
        Self {
            freshness,
            debounce,
            remote: HashMap::new(),
            local: LocalState::default(),
        }
    }

    fn is_fresh(&self, entry: &RemoteEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.received_at) < self.freshness
    }

    /// Record a remote status. Returns whether the visible state may have
    /// changed.
    pub fn on_remote_typing(&mut self, status: TypingStatus, now: Instant) -> bool {
        if !status.is_typing {
            return self.remote.remove(&status.user_id).is_some();
        }
        self.remote.insert(
            status.user_id.clone(),
            RemoteEntry {
                status,
                received_at: now,
            },
        );
        true
    }

    /// The most recently updated active remote status.
    pub fn current(&self, now: Instant) -> Option<TypingStatus> {
        self.remote
            .values()
            .filter(|entry| self.is_fresh(entry, now))
            .max_by_key(|entry| (entry.received_at, entry.status.updated_at))
            .map(|entry| entry.status.clone())
    }

    /// Every active remote status, newest first.
    pub fn active(&self, now: Instant) -> Vec<TypingStatus> {
        let mut entries: Vec<&RemoteEntry> = self
            .remote
            .values()
            .filter(|entry| self.is_fresh(entry, now))
            .collect();
        entries.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        entries.into_iter().map(|entry| entry.status.clone()).collect()
    }

    pub fn prune(&mut self, now: Instant) {
        let freshness = self.freshness;
        self.remote
            .retain(|_, entry| now.saturating_duration_since(entry.received_at) < freshness);
    }

    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }

    pub fn set_local_typing(&mut self, is_typing: bool, now: Instant) -> LocalTyping {
        if !is_typing {
            self.local.deferred = None;
            if !self.local.broadcast {
                return LocalTyping::Skip;
            }
            self.mark_sent(false, now);
            return LocalTyping::Send(false);
        }

        match self.local.last_sent_at {
            Some(at) if now.saturating_duration_since(at) < self.debounce => {
                if self.local.deferred.replace(true).is_some() {
                    // A flush is already scheduled for this window.
                    return LocalTyping::Skip;
                }
                LocalTyping::Defer(self.debounce - now.saturating_duration_since(at))
            }
            _ => {
                self.mark_sent(true, now);
                LocalTyping::Send(true)
            }
        }
    }

    /// Deliver a deferred value once its window has passed.
    pub fn flush_local(&mut self, now: Instant) -> Option<bool> {
        let deferred = self.local.deferred?;
        if let Some(at) = self.local.last_sent_at {
            if now.saturating_duration_since(at) < self.debounce {
                return None;
            }
        }
        self.local.deferred = None;
        self.mark_sent(deferred, now);
        Some(deferred)
    }

    /// Drop any local typing state, as on send. Returns whether `false`
    /// must be broadcast.
    pub fn clear_local(&mut self) -> bool {
        self.local.deferred = None;
        std::mem::replace(&mut self.local.broadcast, false)
    }

    pub fn is_local_typing(&self) -> bool {
        self.local.broadcast
    }

    fn mark_sent(&mut self, value: bool, now: Instant) {
        self.local.broadcast = value;
        self.local.last_sent_at = Some(now);
    }
}

impl Default for TypingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
