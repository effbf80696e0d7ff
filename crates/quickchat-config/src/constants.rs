// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
pub(crate) const DEFAULT_PORT: u16 = 8080;
pub(crate) const DEFAULT_HEALTH_PORT: u16 = 8081;

// Gateway queues
pub(crate) const DEFAULT_OUTBOUND_BUFFER: usize = 256;
pub(crate) const DEFAULT_LOG_QUEUE_CAPACITY: usize = 10_000;

// Persistence retry backoff (milliseconds), used by the at_least_once policy
pub(crate) const DEFAULT_RETRY_BASE_MS: u64 = 100;
pub(crate) const DEFAULT_RETRY_MAX_MS: u64 = 5_000;

// Inbound WebSocket frame limit: a chat line plus metadata, never media
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB
