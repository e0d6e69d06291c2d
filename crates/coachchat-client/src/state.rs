//! Mutable chat state owned by the controller.
//!
//! The [`ChatState`] struct lives behind one `std::sync::Mutex`; every
//! continuation (feed callback, load, send) checks the session generation
//! under that lock before it mutates anything.

use coachchat_shared::error::ChatError;
use coachchat_store::MessageStore;

use crate::typing::TypingCoordinator;

pub struct ChatState {
    /// Ordered message log of the room.
    pub store: MessageStore,

    /// Remote typing indicators and the local debounce state.
    pub typing: TypingCoordinator,

    /// Last error surfaced to the UI, until cleared.
    pub last_error: Option<ChatError>,

    /// Bumped by teardown; continuations from an older generation are
    /// no-ops.
    pub generation: u64,

    /// Whether subscriptions were opened by `start`.
    pub started: bool,

    pub torn_down: bool,

    /// Offset of the next page for `load_more`.
    pub next_offset: u32,

    /// Whether the last page came back full.
    pub has_more: bool,

    /// A `load_more` request is in flight.
    pub loading_more: bool,
}

impl ChatState {
    pub fn new(typing: TypingCoordinator) -> Self {
        Self {
            store: MessageStore::new(),
            typing,
            last_error: None,
            generation: 0,
            started: false,
            torn_down: false,
            next_offset: 0,
            has_more: true,
            loading_more: false,
        }
    }

    /// Whether a continuation captured at `generation` may still mutate.
    pub fn is_current(&self, generation: u64) -> bool {
        !self.torn_down && self.generation == generation
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(TypingCoordinator::new())
    }
}
