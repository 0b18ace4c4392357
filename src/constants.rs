//! Application constants

/// Default Graph API base used for page publishing and analytics
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com/v17.0";

/// Default SQLite database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/app.sqlite?mode=rwc";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 4000;

/// Scheduler tick period in seconds
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 60;

/// Analytics polling period in seconds (hourly)
pub const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 60 * 60;

/// Upper bound for a single outbound Graph API request
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;

/// Default number of analytics snapshots returned by the history endpoint
pub const DEFAULT_HISTORY_LIMIT: i64 = 2;

/// Maximum number of analytics snapshots returned by the history endpoint
pub const MAX_HISTORY_LIMIT: i64 = 50;

/// Capacity of the slot event broadcast buffer
pub const EVENT_BUFFER_SIZE: usize = 256;
