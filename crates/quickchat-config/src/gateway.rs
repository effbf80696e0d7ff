// ============================================================================
// Gateway Configuration
// ============================================================================

use crate::constants::{DEFAULT_LOG_QUEUE_CAPACITY, DEFAULT_OUTBOUND_BUFFER, MAX_MESSAGE_SIZE};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Identifies this gateway on the broadcast fabric
    pub instance_id: String,
    /// Browser origins allowed to open a socket; empty allows any
    pub allowed_origins: Vec<String>,
    /// Per-session outbound queue; events beyond it are dropped for that session
    pub outbound_buffer: usize,
    /// Events waiting for the durable log; overflow is broadcast-only
    pub log_queue_capacity: usize,
    pub max_message_size: usize,
}

impl GatewayConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            instance_id: std::env::var("GATEWAY_INSTANCE_ID")
                .ok()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            allowed_origins: std::env::var("GATEWAY_ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            outbound_buffer: std::env::var("GATEWAY_OUTBOUND_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_OUTBOUND_BUFFER),
            log_queue_capacity: std::env::var("GATEWAY_LOG_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_LOG_QUEUE_CAPACITY),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Whether a browser `Origin` header may open a socket
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            _ if self.allowed_origins.is_empty() => true,
            // Non-browser clients send no Origin
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin.trim_end_matches('/'))),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            allowed_origins: Vec::new(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            log_queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}
