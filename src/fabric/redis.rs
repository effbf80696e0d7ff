use std::time::Duration;

use quickchat_config::RedisConfig;
use quickchat_error::AppResult;
use quickchat_redis::{PubSubMessage, RedisClient, RedisSubscriber};
use quickchat_types::RoomId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{BroadcastFabric, FabricDeliveries, FabricEnvelope};
use crate::metrics;
use crate::ops::ReadinessProbe;

enum PublishCommand {
    Publish(FabricEnvelope),
    Close(oneshot::Sender<()>),
}

/// Redis pub/sub fabric: one channel per room, `"{prefix}{room_id}"`.
///
/// Subscriptions are held by a `RedisSubscriber` task that resubscribes
/// every joined room after a reconnect. Publishes go through a single task
/// over a `ConnectionManager`, so they leave in the order `publish` was
/// called.
pub struct RedisFabric {
    prefix: String,
    subscriber: RedisSubscriber,
    publisher: mpsc::UnboundedSender<PublishCommand>,
    client: RedisClient,
}

impl RedisFabric {
    pub async fn connect(config: &RedisConfig) -> AppResult<(Self, FabricDeliveries)> {
        info!(url = %config.safe_url(), "Connecting broadcast fabric to Redis");

        let client = RedisClient::connect(&config.url).await?;
        let (subscriber, raw) = RedisSubscriber::spawn(
            &config.url,
            Duration::from_millis(config.reconnect_delay_ms),
        )?;

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(
            client.clone(),
            config.room_channel_prefix.clone(),
            publish_rx,
        ));

        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        tokio::spawn(decode_deliveries(raw, deliveries_tx));

        info!(prefix = %config.room_channel_prefix, "Redis broadcast fabric ready");

        let fabric = Self {
            prefix: config.room_channel_prefix.clone(),
            subscriber,
            publisher: publish_tx,
            client,
        };
        Ok((fabric, deliveries_rx))
    }

    fn channel(&self, room: &RoomId) -> String {
        room_channel(&self.prefix, room)
    }

    /// A readiness probe sharing this fabric's connection
    pub fn probe(&self) -> RedisProbe {
        RedisProbe {
            client: self.client.clone(),
        }
    }
}

fn room_channel(prefix: &str, room: &RoomId) -> String {
    format!("{}{}", prefix, room)
}

#[async_trait::async_trait]
impl BroadcastFabric for RedisFabric {
    fn join(&self, room: &RoomId) {
        debug!(room_id = %room, "Subscribing to room channel");
        self.subscriber.subscribe(self.channel(room));
    }

    fn leave(&self, room: &RoomId) {
        debug!(room_id = %room, "Unsubscribing from room channel");
        self.subscriber.unsubscribe(self.channel(room));
    }

    fn publish(&self, envelope: FabricEnvelope) {
        if self.publisher.send(PublishCommand::Publish(envelope)).is_err() {
            metrics::FABRIC_PUBLISH_FAILURES.inc();
            warn!("Fabric publisher stopped, envelope dropped");
        }
    }

    async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.publisher.send(PublishCommand::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        self.subscriber.shutdown();
        info!("Redis broadcast fabric closed");
    }
}

async fn run_publisher(
    mut client: RedisClient,
    prefix: String,
    mut commands: mpsc::UnboundedReceiver<PublishCommand>,
) {
    while let Some(command) = commands.recv().await {
        let envelope = match command {
            PublishCommand::Publish(envelope) => envelope,
            PublishCommand::Close(done) => {
                let _ = done.send(());
                break;
            }
        };

        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::FABRIC_PUBLISH_FAILURES.inc();
                warn!(error = %e, room_id = %envelope.room_id, "Failed to serialize fabric envelope");
                continue;
            }
        };

        let channel = room_channel(&prefix, &envelope.room_id);
        if let Err(e) = client.publish(&channel, &payload).await {
            metrics::FABRIC_PUBLISH_FAILURES.inc();
            warn!(error = %e, channel = %channel, "Failed to publish to Redis, envelope dropped");
        }
    }
    debug!("Fabric publisher stopped");
}

async fn decode_deliveries(
    mut raw: mpsc::UnboundedReceiver<PubSubMessage>,
    deliveries: mpsc::UnboundedSender<FabricEnvelope>,
) {
    while let Some(message) = raw.recv().await {
        match serde_json::from_slice::<FabricEnvelope>(&message.payload) {
            Ok(envelope) => {
                if deliveries.send(envelope).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, channel = %message.channel, "Ignoring malformed fabric envelope");
            }
        }
    }
}

/// Readiness check for the Redis connection
pub struct RedisProbe {
    client: RedisClient,
}

#[async_trait::async_trait]
impl ReadinessProbe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> AppResult<()> {
        let mut client = self.client.clone();
        client.ping().await?;
        Ok(())
    }
}
