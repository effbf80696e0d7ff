// ============================================================================
// Managed Pub/Sub subscription
// ============================================================================
//
// A single background task owns the Pub/Sub connection. Channel changes are
// sent to it as commands, so callers never hold the connection. When the
// connection drops, the task reconnects and resubscribes every channel it
// was asked to follow.
//
// ============================================================================

use crate::Result;
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A payload received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

/// Handle to the subscription task. Dropping every handle stops the task.
#[derive(Clone)]
pub struct RedisSubscriber {
    commands: mpsc::UnboundedSender<Command>,
}

impl RedisSubscriber {
    /// Start the subscription task.
    ///
    /// Fails only on a malformed URL; an unreachable server is retried in the
    /// background every `reconnect_delay`.
    pub fn spawn(
        url: &str,
        reconnect_delay: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PubSubMessage>)> {
        let client = redis::Client::open(url)?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_subscription(client, reconnect_delay, cmd_rx, msg_tx));

        Ok((Self { commands: cmd_tx }, msg_rx))
    }

    /// Follow a channel. Idempotent.
    pub fn subscribe(&self, channel: impl Into<String>) {
        let _ = self.commands.send(Command::Subscribe(channel.into()));
    }

    /// Stop following a channel. Idempotent.
    pub fn unsubscribe(&self, channel: impl Into<String>) {
        let _ = self.commands.send(Command::Unsubscribe(channel.into()));
    }

    /// Ask the task to drop its connection and exit
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

enum Event {
    Message(Option<redis::Msg>),
    Command(Option<Command>),
}

enum Exit {
    Reconnect,
    Stop,
}

async fn run_subscription(
    client: redis::Client,
    reconnect_delay: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    deliveries: mpsc::UnboundedSender<PubSubMessage>,
) {
    let mut channels: BTreeSet<String> = BTreeSet::new();

    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => {
                match serve_connection(&mut pubsub, &mut channels, &mut commands, &deliveries)
                    .await
                {
                    Exit::Stop => break,
                    Exit::Reconnect => {
                        warn!(
                            channels = channels.len(),
                            "Pub/Sub connection lost, reconnecting..."
                        );
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to create Redis Pub/Sub connection, retrying...");
            }
        }

        // Keep accepting channel changes while waiting to reconnect
        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Subscribe(channel)) => {
                        channels.insert(channel);
                    }
                    Some(Command::Unsubscribe(channel)) => {
                        channels.remove(&channel);
                    }
                    Some(Command::Shutdown) | None => return,
                },
            }
        }
    }

    info!("Pub/Sub subscription stopped");
}

async fn serve_connection(
    pubsub: &mut redis::aio::PubSub,
    channels: &mut BTreeSet<String>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    deliveries: &mpsc::UnboundedSender<PubSubMessage>,
) -> Exit {
    for channel in channels.iter() {
        if let Err(e) = pubsub.subscribe(channel.as_str()).await {
            error!(error = %e, channel = %channel, "Failed to resubscribe");
            return Exit::Reconnect;
        }
    }
    if !channels.is_empty() {
        info!(channels = channels.len(), "Resubscribed to Pub/Sub channels");
    }

    loop {
        let event = {
            let mut stream = pubsub.on_message();
            tokio::select! {
                msg = stream.next() => Event::Message(msg),
                cmd = commands.recv() => Event::Command(cmd),
            }
        };

        match event {
            Event::Message(Some(msg)) => {
                let delivered = PubSubMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload_bytes().to_vec(),
                };
                if deliveries.send(delivered).is_err() {
                    debug!("Delivery receiver dropped, stopping subscription");
                    return Exit::Stop;
                }
            }
            Event::Message(None) => return Exit::Reconnect,
            Event::Command(Some(Command::Subscribe(channel))) => {
                if channels.insert(channel.clone())
                    && let Err(e) = pubsub.subscribe(channel.as_str()).await
                {
                    error!(error = %e, channel = %channel, "Failed to subscribe");
                    return Exit::Reconnect;
                }
            }
            Event::Command(Some(Command::Unsubscribe(channel))) => {
                if channels.remove(&channel)
                    && let Err(e) = pubsub.unsubscribe(channel.as_str()).await
                {
                    error!(error = %e, channel = %channel, "Failed to unsubscribe");
                    return Exit::Reconnect;
                }
            }
            Event::Command(Some(Command::Shutdown)) | Event::Command(None) => return Exit::Stop,
        }
    }
}
