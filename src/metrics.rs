use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntGauge, TextEncoder, opts, register_int_counter, register_int_gauge,
};

// ============================================================================
// Gateway
// ============================================================================

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_connections_total",
        "WebSocket sessions accepted"
    ))
    .expect("Failed to register quickchat_connections_total metric")
});

pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "quickchat_active_sessions",
        "Sessions currently bound to a room on this gateway"
    ))
    .expect("Failed to register quickchat_active_sessions metric")
});

pub static HANDSHAKE_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_handshake_rejections_total",
        "Handshakes refused for a missing room or a disallowed origin"
    ))
    .expect("Failed to register quickchat_handshake_rejections_total metric")
});

pub static MESSAGES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_messages_received_total",
        "Chat frames accepted from clients"
    ))
    .expect("Failed to register quickchat_messages_received_total metric")
});

pub static MALFORMED_FRAMES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_malformed_frames_total",
        "Client frames ignored because they did not parse"
    ))
    .expect("Failed to register quickchat_malformed_frames_total metric")
});

pub static LOCAL_DELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_local_deliveries_total",
        "Events queued to local sessions"
    ))
    .expect("Failed to register quickchat_local_deliveries_total metric")
});

pub static OUTBOUND_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_outbound_dropped_total",
        "Events dropped for a session whose outbound queue was full"
    ))
    .expect("Failed to register quickchat_outbound_dropped_total metric")
});

pub static FABRIC_PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_fabric_publish_failures_total",
        "Envelopes that never reached the broadcast fabric"
    ))
    .expect("Failed to register quickchat_fabric_publish_failures_total metric")
});

pub static EVENT_ENCODE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_event_encode_failures_total",
        "Chat events that could not be serialized into an outbound frame"
    ))
    .expect("Failed to register quickchat_event_encode_failures_total metric")
});

pub static LOG_ENQUEUE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_log_enqueue_failures_total",
        "Events that were broadcast but never appended to the durable log"
    ))
    .expect("Failed to register quickchat_log_enqueue_failures_total metric")
});

// ============================================================================
// Persistence worker
// ============================================================================

pub static RECORDS_PERSISTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_records_persisted_total",
        "Log records written to storage"
    ))
    .expect("Failed to register quickchat_records_persisted_total metric")
});

pub static RECORDS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_records_skipped_total",
        "Malformed log records skipped"
    ))
    .expect("Failed to register quickchat_records_skipped_total metric")
});

pub static STORAGE_WRITE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "quickchat_storage_write_failures_total",
        "Failed storage writes, retries included"
    ))
    .expect("Failed to register quickchat_storage_write_failures_total metric")
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
