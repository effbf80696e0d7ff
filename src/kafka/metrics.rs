use once_cell::sync::Lazy;
use prometheus::{Counter, Histogram, register_counter, register_histogram};

/// Kafka producer success counter
pub static KAFKA_PRODUCE_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quickchat_kafka_produce_success_total",
        "Chat events acknowledged by the broker"
    )
    .expect("Failed to register quickchat_kafka_produce_success_total metric")
});

/// Kafka producer failure counter (includes appends rejected by the open circuit)
pub static KAFKA_PRODUCE_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quickchat_kafka_produce_failure_total",
        "Chat events the broker did not acknowledge"
    )
    .expect("Failed to register quickchat_kafka_produce_failure_total metric")
});

/// Kafka producer latency histogram
pub static KAFKA_PRODUCE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "quickchat_kafka_produce_latency_seconds",
        "Time from append to broker acknowledgement",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register quickchat_kafka_produce_latency_seconds metric")
});

/// Records received by the persistence consumer
pub static KAFKA_CONSUME_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quickchat_kafka_consume_success_total",
        "Records received from the chat topic"
    )
    .expect("Failed to register quickchat_kafka_consume_success_total metric")
});

/// Consumer poll errors
pub static KAFKA_CONSUME_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quickchat_kafka_consume_failure_total",
        "Errors returned while polling the chat topic"
    )
    .expect("Failed to register quickchat_kafka_consume_failure_total metric")
});

/// Offset commits that failed
pub static KAFKA_COMMIT_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quickchat_kafka_commit_failure_total",
        "Offset commits rejected by the broker"
    )
    .expect("Failed to register quickchat_kafka_commit_failure_total metric")
});
