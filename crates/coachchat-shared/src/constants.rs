/// Application name
pub const APP_NAME: &str = "coachchat";

/// Maximum message length in characters (after trimming)
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Label shown when the sender profile join is missing
pub const FALLBACK_DISPLAY_NAME: &str = "Unknown user";

/// Default number of messages fetched per page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Remote typing signals older than this are treated as absent
pub const TYPING_FRESHNESS_MS: u64 = 5_000;

/// Local typing broadcasts are collapsed into one per window
pub const TYPING_DEBOUNCE_MS: u64 = 100;

/// Maximum distance between a placeholder and its echoed row
pub const ECHO_MATCH_WINDOW_SECS: i64 = 30;

/// Default HTTP request timeout for the REST backend
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Capacity of the UI change-event broadcast channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Capacity of a transport event stream
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Backend table / realtime topic names
pub const MESSAGES_TABLE: &str = "messages";
pub const TYPING_TABLE: &str = "typing_status";
