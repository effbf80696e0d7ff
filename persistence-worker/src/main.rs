// ============================================================================
// Persistence Worker - chat log to PostgreSQL
// ============================================================================
//
// Consumes the chat topic in the KAFKA_CONSUMER_GROUP consumer group and
// writes one `chats` row per record. A fresh group starts from the earliest
// retained offset, so a new deployment backfills whatever the topic holds.
//
// Rows are written at least once per committed record: a crash between the
// write and the commit redelivers the record and the table gets a duplicate.
// See PERSISTENCE_COMMIT_POLICY for what happens when a write fails.
//
// ============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use quickchat_config::Config;
use quickchat_server::kafka::KafkaLogSource;
use quickchat_server::ops::{self, OpsState};
use quickchat_server::persistence::{PersistenceWorker, PgChatStore};
use quickchat_server::{init_tracing, shutdown_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.rust_log, config.logging.format);

    info!("=== Persistence Worker Starting ===");
    info!("Kafka Enabled: {}", config.kafka.enabled);
    info!("Kafka Brokers: {}", config.kafka.brokers);
    info!("Kafka Topic: {}", config.kafka.topic);
    info!("Kafka Consumer Group: {}", config.kafka.consumer_group);
    info!("Commit policy: {:?}", config.persistence.commit_policy);

    if !config.kafka.enabled {
        error!("Persistence worker requires KAFKA_ENABLED=true");
        anyhow::bail!("Kafka is disabled, nothing to consume");
    }

    let database_url = config.require_database_url()?;
    let store = PgChatStore::connect(database_url, &config.db)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");

    let source = KafkaLogSource::new(&config.kafka).context("Failed to initialize Kafka consumer")?;
    info!("Subscribed to Kafka topic: {}", config.kafka.topic);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let store = Arc::new(store);
    let ops_state = OpsState::new().with_probe(store.clone());
    let ops_addr = format!("0.0.0.0:{}", config.health_port);
    let ops_token = shutdown.clone();
    let ops_server =
        tokio::spawn(async move { ops::serve(&ops_addr, ops_state, ops_token).await });

    PersistenceWorker::new(source, store, config.persistence.clone())
        .run(shutdown.clone())
        .await;

    shutdown.cancel();
    match ops_server.await {
        Ok(Err(e)) => error!(error = %e, "Ops HTTP server failed"),
        Err(e) => error!(error = %e, "Ops HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Persistence Worker stopped");
    Ok(())
}
