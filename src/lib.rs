// ============================================================================
// QuickChat Server
// ============================================================================
//
// Real-time group chat fan-out:
// - gateway     - WebSocket sessions bound to rooms, local fan-out
// - fabric      - cross-instance room broadcast (Redis pub/sub or in-memory)
// - event_log   - durable chat log seam, with the in-memory log
// - kafka       - Kafka producer / consumer behind the event log seam
// - persistence - log consumer writing chat rows to PostgreSQL
// - ops         - /health and /metrics
//
// A message is broadcast to peers and appended to the log independently:
// a broker outage never stops live chat.
//
// ============================================================================

pub mod event_log;
pub mod fabric;
pub mod gateway;
pub mod kafka;
pub mod metrics;
pub mod ops;
pub mod persistence;
pub mod utils;

pub use gateway::{Gateway, run_websocket_server};

use quickchat_config::LogFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `rust_log` follows `RUST_LOG`
/// syntax; an unparsable filter falls back to `info`.
pub fn init_tracing(rust_log: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolve on SIGTERM or Ctrl-C
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, initiating graceful shutdown..."),
        _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown..."),
    }
}
