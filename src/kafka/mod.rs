// Kafka module for the durable chat log
//
// The gateway appends every chat event to one topic keyed by room id; the
// persistence worker consumes that topic in a consumer group and writes the
// events to storage.

pub mod circuit_breaker;
pub mod config;
pub mod consumer;
pub mod metrics;
pub mod producer;

// Re-export commonly used types
pub use consumer::KafkaLogSource;
pub use producer::KafkaEventLog;
