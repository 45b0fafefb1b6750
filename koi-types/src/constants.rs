// ─── Protocol Parameters ─────────────────────────────────────────────────────

/// Protocol API version advertised by servers.
pub const PROTOCOL_VERSION: &str = "1.1.0";

/// Maximum accepted age of a request timestamp (seconds).
pub const MAX_TIMESTAMP_SKEW: u64 = 300; // 5 minutes

// ─── Network Parameters ──────────────────────────────────────────────────────

/// Default port a full node listens on.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default per-request HTTP timeout (seconds).
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

/// Default interval between poll rounds on partial nodes (seconds).
pub const DEFAULT_POLLING_INTERVAL: u64 = 5;

// ─── Delivery Parameters ─────────────────────────────────────────────────────

/// Consecutive delivery failures to one peer before a fresh handshake is
/// attempted instead of further blind retries.
pub const DEFAULT_RETRY_THRESHOLD: u32 = 5;

/// Delay before a failed webhook batch is retried (seconds).
pub const DEFAULT_RETRY_INTERVAL: u64 = 5;
