// ============================================================================
// QuickChat Gateway
// ============================================================================
//
// WebSocket gateway binary. Accepts sessions on PORT, replicates room
// traffic over the broadcast fabric, appends every message to Kafka, and
// serves /health and /metrics on HEALTH_PORT.
//
// ============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use quickchat_config::{Config, FabricMode};
use quickchat_server::event_log::EventLog;
use quickchat_server::fabric::{BroadcastFabric, FabricDeliveries, MemoryFabricHub, RedisFabric};
use quickchat_server::kafka::KafkaEventLog;
use quickchat_server::ops::{self, OpsState};
use quickchat_server::{Gateway, init_tracing, run_websocket_server, shutdown_signal};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.rust_log, config.logging.format);

    info!("=== QuickChat Gateway Starting ===");
    info!("Instance ID: {}", config.gateway.instance_id);
    info!("Fabric mode: {:?}", config.redis.fabric_mode);
    info!("Kafka Enabled: {}", config.kafka.enabled);
    info!("Kafka Brokers: {}", config.kafka.brokers);
    info!("Kafka Topic: {}", config.kafka.topic);

    let mut ops_state = OpsState::new();

    let (fabric, deliveries): (Arc<dyn BroadcastFabric>, FabricDeliveries) =
        match config.redis.fabric_mode {
            FabricMode::Redis => {
                info!("Connecting to Redis at: {}", config.redis.safe_url());
                let (fabric, deliveries) = RedisFabric::connect(&config.redis)
                    .await
                    .context("Failed to connect broadcast fabric to Redis")?;
                ops_state = ops_state.with_probe(Arc::new(fabric.probe()));
                (Arc::new(fabric), deliveries)
            }
            FabricMode::Memory => {
                warn!("Using in-memory fabric: rooms are not shared with other instances");
                let (fabric, deliveries) = MemoryFabricHub::new().attach();
                (Arc::new(fabric), deliveries)
            }
        };

    let event_log = KafkaEventLog::new(&config.kafka).context("Failed to initialize Kafka producer")?;
    if !event_log.is_enabled() {
        warn!("Kafka disabled: chat messages will not be persisted");
    }
    ops_state = ops_state.with_report(Arc::new(event_log.clone()));
    let event_log: Arc<dyn EventLog> = Arc::new(event_log);

    let gateway = Gateway::new(
        config.gateway.clone(),
        config.logging.clone(),
        config.kafka.topic.clone(),
        fabric,
        event_log,
    );
    let relay = gateway.spawn_relay(deliveries);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("WebSocket gateway listening on ws://{}", config.bind_address);
    let server = tokio::spawn(run_websocket_server(gateway.clone(), listener));

    let ops_shutdown = CancellationToken::new();
    let ops_addr = format!("0.0.0.0:{}", config.health_port);
    let ops_state = ops_state.with_gateway(gateway.clone());
    let ops_token = ops_shutdown.clone();
    let ops_server =
        tokio::spawn(async move { ops::serve(&ops_addr, ops_state, ops_token).await });

    shutdown_signal().await;

    ops_shutdown.cancel();
    gateway.shutdown().await;

    if let Err(e) = server.await {
        error!(error = %e, "WebSocket listener task failed");
    }
    relay.abort();
    match ops_server.await {
        Ok(Err(e)) => error!(error = %e, "Ops HTTP server failed"),
        Err(e) => error!(error = %e, "Ops HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    info!("QuickChat Gateway stopped");
    Ok(())
}
