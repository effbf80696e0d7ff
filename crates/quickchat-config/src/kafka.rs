// ============================================================================
// Kafka Configuration
// ============================================================================

/// Kafka configuration for the durable chat log
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Whether Kafka is enabled (false = broadcast-only, nothing is persisted)
    pub enabled: bool,
    /// Comma-separated list of Kafka brokers (e.g., "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// Topic carrying serialized chat events
    pub topic: String,
    /// Consumer group ID for persistence workers
    pub consumer_group: String,
    /// SSL/TLS enabled
    pub ssl_enabled: bool,
    /// SASL mechanism (e.g., "PLAIN", "SCRAM-SHA-256")
    pub sasl_mechanism: Option<String>,
    /// SASL username (API key on managed clusters)
    pub sasl_username: Option<String>,
    /// SASL password (API secret on managed clusters)
    pub sasl_password: Option<String>,
    /// Path to CA certificate file (for self-signed certificates)
    pub ssl_ca_location: Option<String>,
    // producer-specific settings
    pub producer_compression: String, // "zstd" | "snappy" | "gzip" | "lz4" | "none"
    pub producer_acks: String,        // "all" | "1" | "-1" | "0"
    pub producer_linger_ms: u32,
    pub producer_request_timeout_ms: u32,
    pub producer_delivery_timeout_ms: u32,
    pub producer_enable_idempotence: bool,
    /// Per-append wait for the broker ack before reporting BrokerUnavailable
    pub producer_send_timeout_ms: u64,
    /// Consecutive append failures before the producer circuit opens
    pub producer_failure_threshold: u32,
    /// How long an open circuit rejects appends before probing again
    pub producer_reset_timeout_secs: u64,
}

impl KafkaConfig {
    pub(crate) fn from_env() -> Self {
        // SASL is only configured when an API key pair is present,
        // PLAIN being the managed-cluster default.
        let sasl_username = std::env::var("KAFKA_SASL_USERNAME").ok();
        let sasl_password = std::env::var("KAFKA_SASL_PASSWORD").ok();
        let sasl_mechanism = std::env::var("KAFKA_SASL_MECHANISM").ok().or_else(|| {
            (sasl_username.is_some() && sasl_password.is_some()).then(|| "PLAIN".to_string())
        });

        Self {
            enabled: std::env::var("KAFKA_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            brokers: std::env::var("KAFKA_BROKERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "chats".to_string()),
            consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "chats-v1-group".to_string()),
            ssl_enabled: std::env::var("KAFKA_SSL_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            sasl_mechanism,
            sasl_username,
            sasl_password,
            ssl_ca_location: std::env::var("KAFKA_SSL_CA_LOCATION").ok(),
            producer_compression: std::env::var("KAFKA_PRODUCER_COMPRESSION")
                .unwrap_or_else(|_| "snappy".to_string()),
            producer_acks: std::env::var("KAFKA_PRODUCER_ACKS")
                .unwrap_or_else(|_| "all".to_string()),
            producer_linger_ms: std::env::var("KAFKA_PRODUCER_LINGER_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            producer_request_timeout_ms: std::env::var("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30000),
            producer_delivery_timeout_ms: std::env::var("KAFKA_PRODUCER_DELIVERY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120000),
            producer_enable_idempotence: std::env::var("KAFKA_PRODUCER_ENABLE_IDEMPOTENCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            producer_send_timeout_ms: std::env::var("KAFKA_PRODUCER_SEND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            producer_failure_threshold: std::env::var("KAFKA_PRODUCER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            producer_reset_timeout_secs: std::env::var("KAFKA_PRODUCER_RESET_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    /// Configuration for a log that never talks to a broker.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            brokers: "localhost:9092".to_string(),
            topic: "chats".to_string(),
            consumer_group: "chats-v1-group".to_string(),
            ssl_enabled: false,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            producer_compression: "none".to_string(),
            producer_acks: "all".to_string(),
            producer_linger_ms: 0,
            producer_request_timeout_ms: 30000,
            producer_delivery_timeout_ms: 120000,
            producer_enable_idempotence: false,
            producer_send_timeout_ms: 2000,
            producer_failure_threshold: 5,
            producer_reset_timeout_secs: 30,
        }
    }
}
