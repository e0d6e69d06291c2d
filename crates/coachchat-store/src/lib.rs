//! # coachchat-store
//!
//! In-memory message log for the active chat room.
//!
//! The crate exposes [`MessageStore`], the single source of truth the UI
//! renders from, and [`fetch_page`], the paginated loader that feeds it.
//! The store is a plain synchronous value; its owner serialises access
//! (the chat controller keeps it behind one mutex).

pub mod fetch;
pub mod messages;

pub use fetch::fetch_page;
pub use messages::MessageStore;
