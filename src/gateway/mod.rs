// ============================================================================
// Connection Gateway
// ============================================================================
//
// Owns the local room sets of one gateway instance. For every inbound chat
// event it does two independent things:
//
//   1. broadcast: local peers directly, remote gateways via the fabric
//   2. durable enqueue: hand the event to the log writer
//
// Neither waits for nor depends on the other. A failed enqueue is logged
// and the event stays broadcast-only.
//
// ============================================================================

mod connection;
pub mod handshake;
mod log_writer;
pub mod rooms;
pub mod session;

pub use connection::run_websocket_server;
pub use handshake::ResolvedHandshake;
pub use session::{OutboundFrame, Session, SessionId, SessionReceiver};

use std::sync::Arc;

use quickchat_config::{GatewayConfig, LoggingConfig};
use quickchat_types::{ChatEvent, ChatFrame, RoomId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event_log::EventLog;
use crate::fabric::{BroadcastFabric, FabricDeliveries, FabricEnvelope};
use crate::metrics;
use crate::utils::loggable_identity;
use log_writer::LogWriter;
use rooms::RoomRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    pub rooms: usize,
    pub sessions: usize,
}

/// Cheap to clone; all clones share one instance
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    logging: LoggingConfig,
    rooms: RoomRegistry,
    fabric: Arc<dyn BroadcastFabric>,
    log_writer: LogWriter,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Build a gateway around its fabric and durable log. Must be called
    /// inside a tokio runtime: the log writer task starts here.
    pub fn new(
        config: GatewayConfig,
        logging: LoggingConfig,
        topic: impl Into<String>,
        fabric: Arc<dyn BroadcastFabric>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        let topic = topic.into();
        let log_writer = LogWriter::spawn(log, topic.clone(), config.log_queue_capacity);

        info!(
            instance_id = %config.instance_id,
            topic = %topic,
            "Gateway initialized"
        );

        Self {
            inner: Arc::new(GatewayInner {
                config,
                logging,
                rooms: RoomRegistry::new(),
                fabric,
                log_writer,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.config.instance_id
    }

    /// Bind a new session to `room_id`. The first local member of a room
    /// subscribes this gateway to the room on the fabric.
    pub fn connect(&self, room_id: RoomId, identity: String) -> (Session, SessionReceiver) {
        let session = Session::new(room_id, identity);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.inner.config.outbound_buffer.max(1));

        self.inner
            .rooms
            .join(&session.room_id, session.id, outbound_tx, |room| {
                self.inner.fabric.join(room);
            });

        metrics::CONNECTIONS_TOTAL.inc();
        metrics::ACTIVE_SESSIONS.inc();
        info!(
            session_id = %session.id,
            room_id = %session.room_id,
            identity = %loggable_identity(&session.identity, &self.inner.logging),
            "Session joined room"
        );

        (session, outbound_rx)
    }

    /// Handle one chat frame from `session`: broadcast to every other member
    /// of its room, local and remote, and enqueue it on the durable log.
    pub fn on_message(&self, session: &Session, frame: ChatFrame) {
        metrics::MESSAGES_RECEIVED.inc();
        let event = ChatEvent::from_frame(session.room_id.clone(), frame);

        if let Some(outbound) = encode(&event) {
            let outcome = self.inner.rooms.fan_out(&event.room_id, &outbound, Some(session.id));
            record_fan_out(&event.room_id, outcome);
        }

        self.inner
            .fabric
            .publish(FabricEnvelope::new(self.instance_id(), event.clone()));

        if let Err(e) = self.inner.log_writer.enqueue(event) {
            metrics::LOG_ENQUEUE_FAILURES.inc();
            warn!(
                error = %e,
                session_id = %session.id,
                room_id = %session.room_id,
                "Durable enqueue rejected, event was broadcast only"
            );
        }
    }

    /// Remove `session`. The last local member of a room unsubscribes this
    /// gateway from the room on the fabric.
    pub fn on_disconnect(&self, session: &Session) {
        self.inner.rooms.leave(&session.room_id, session.id, |room| {
            self.inner.fabric.leave(room);
        });

        metrics::ACTIVE_SESSIONS.dec();
        info!(
            session_id = %session.id,
            room_id = %session.room_id,
            "Session left room"
        );
    }

    /// Deliver an envelope from the fabric to this gateway's local sessions
    pub fn relay(&self, envelope: FabricEnvelope) {
        // Local peers were served directly when the event was received
        if envelope.origin == self.instance_id() {
            return;
        }
        if envelope.event.room_id != envelope.room_id {
            warn!(
                room_id = %envelope.room_id,
                event_room_id = %envelope.event.room_id,
                origin = %envelope.origin,
                "Dropping fabric envelope routed to the wrong room"
            );
            return;
        }

        if let Some(outbound) = encode(&envelope.event) {
            let outcome = self.inner.rooms.fan_out(&envelope.room_id, &outbound, None);
            record_fan_out(&envelope.room_id, outcome);
        }
    }

    /// Relay fabric deliveries until the fabric closes or the gateway stops
    pub fn spawn_relay(&self, mut deliveries: FabricDeliveries) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = gateway.inner.shutdown.cancelled() => break,
                    envelope = deliveries.recv() => match envelope {
                        Some(envelope) => gateway.relay(envelope),
                        None => break,
                    },
                }
            }
            debug!("Fabric relay stopped");
        })
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            rooms: self.inner.rooms.room_count(),
            sessions: self.inner.rooms.session_count(),
        }
    }

    /// Resolves once `shutdown` has been called
    pub async fn stopped(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// End sessions, drain the log writer, close the fabric
    pub async fn shutdown(&self) {
        info!("Gateway shutting down...");
        self.inner.shutdown.cancel();
        self.inner.log_writer.shutdown().await;
        self.inner.fabric.close().await;
        info!("Gateway stopped");
    }
}

fn encode(event: &ChatEvent) -> Option<OutboundFrame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            metrics::EVENT_ENCODE_FAILURES.inc();
            warn!(error = %e, room_id = %event.room_id, "Failed to serialize chat event");
            None
        }
    }
}

fn record_fan_out(room_id: &RoomId, outcome: rooms::FanOut) {
    metrics::LOCAL_DELIVERIES.inc_by(outcome.delivered as u64);
    if outcome.dropped > 0 {
        metrics::OUTBOUND_DROPPED.inc_by(outcome.dropped as u64);
        debug!(
            room_id = %room_id,
            dropped = outcome.dropped,
            "Outbound queue full, event dropped for slow sessions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemoryLog;
    use crate::fabric::MemoryFabricHub;
    use std::time::Duration;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn frame(name: &str, body: &str) -> ChatFrame {
        ChatFrame {
            sender_name: name.to_string(),
            body: Some(body.to_string()),
            created_at: None,
            group_id: None,
        }
    }

    fn gateway(hub: &MemoryFabricHub, log: &MemoryLog) -> Gateway {
        let (fabric, deliveries) = hub.attach();
        let gateway = Gateway::new(
            GatewayConfig::default(),
            LoggingConfig::default(),
            "chats",
            Arc::new(fabric),
            Arc::new(log.clone()),
        );
        gateway.spawn_relay(deliveries);
        gateway
    }

    async fn next_event(rx: &mut SessionReceiver) -> ChatEvent {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("session queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_peer_receives_sender_does_not() {
        let gateway = gateway(&MemoryFabricHub::new(), &MemoryLog::new(1));
        let (alice, mut alice_rx) = gateway.connect(room("abc"), "alice".into());
        let (_bob, mut bob_rx) = gateway.connect(room("abc"), "bob".into());
        let (_carol, mut carol_rx) = gateway.connect(room("xyz"), "carol".into());

        gateway.on_message(&alice, frame("Alice", "hi"));

        let got = next_event(&mut bob_rx).await;
        assert_eq!(got.sender_name, "Alice");
        assert_eq!(got.body.as_deref(), Some("hi"));
        assert_eq!(got.room_id, room("abc"));

        // Let the relay run: the gateway's own envelope must not echo back
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_fan_out_leaves_fabric_failure_counter_alone() {
        let gateway = gateway(&MemoryFabricHub::new(), &MemoryLog::new(1));
        let (alice, _alice_rx) = gateway.connect(room("counted"), "alice".into());
        let (_bob, mut bob_rx) = gateway.connect(room("counted"), "bob".into());

        let fabric_failures = metrics::FABRIC_PUBLISH_FAILURES.get();
        let encode_failures = metrics::EVENT_ENCODE_FAILURES.get();
        gateway.on_message(&alice, frame("Alice", "quote \" and \u{1F600}"));

        let got = next_event(&mut bob_rx).await;
        assert_eq!(got.body.as_deref(), Some("quote \" and \u{1F600}"));
        assert_eq!(metrics::FABRIC_PUBLISH_FAILURES.get(), fabric_failures);
        assert_eq!(metrics::EVENT_ENCODE_FAILURES.get(), encode_failures);
    }

    #[tokio::test]
    async fn test_event_is_enqueued_keyed_by_room() {
        let log = MemoryLog::new(4);
        let gateway = gateway(&MemoryFabricHub::new(), &log);
        let (alice, _rx) = gateway.connect(room("abc"), "alice".into());

        gateway.on_message(&alice, frame("Alice", "hi"));
        gateway.shutdown().await;

        let records = log.records("chats");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn test_broker_outage_does_not_block_broadcast() {
        let log = MemoryLog::new(1);
        log.set_unavailable(true);
        let gateway = gateway(&MemoryFabricHub::new(), &log);
        let (alice, _alice_rx) = gateway.connect(room("abc"), "alice".into());
        let (_bob, mut bob_rx) = gateway.connect(room("abc"), "bob".into());

        gateway.on_message(&alice, frame("Alice", "still here"));

        assert_eq!(next_event(&mut bob_rx).await.body.as_deref(), Some("still here"));
        gateway.shutdown().await;
        assert!(log.records("chats").is_empty());
    }

    #[tokio::test]
    async fn test_cross_gateway_delivery() {
        let hub = MemoryFabricHub::new();
        let log = MemoryLog::new(1);
        let one = gateway(&hub, &log);
        let two = gateway(&hub, &log);

        let (alice, mut alice_rx) = one.connect(room("abc"), "alice".into());
        let (bob, mut bob_rx) = two.connect(room("abc"), "bob".into());

        one.on_message(&alice, frame("Alice", "from one"));
        two.on_message(&bob, frame("Bob", "from two"));

        assert_eq!(next_event(&mut bob_rx).await.body.as_deref(), Some("from one"));
        assert_eq!(next_event(&mut alice_rx).await.body.as_deref(), Some("from two"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_drops_misrouted_envelope() {
        let gateway = gateway(&MemoryFabricHub::new(), &MemoryLog::new(1));
        let (_bob, mut bob_rx) = gateway.connect(room("abc"), "bob".into());

        let mut envelope = FabricEnvelope::new(
            "other-gateway",
            ChatEvent::from_frame(room("xyz"), frame("Mallory", "wrong room")),
        );
        envelope.room_id = room("abc");
        gateway.relay(envelope);

        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_tears_down_room() {
        let gateway = gateway(&MemoryFabricHub::new(), &MemoryLog::new(1));
        let (alice, _a) = gateway.connect(room("abc"), "alice".into());
        let (bob, _b) = gateway.connect(room("abc"), "bob".into());
        assert_eq!(gateway.stats(), GatewayStats { rooms: 1, sessions: 2 });

        gateway.on_disconnect(&alice);
        gateway.on_disconnect(&bob);
        assert_eq!(gateway.stats(), GatewayStats { rooms: 0, sessions: 0 });
    }

    #[tokio::test]
    async fn test_order_is_preserved_within_a_room() {
        let hub = MemoryFabricHub::new();
        let log = MemoryLog::new(1);
        let one = gateway(&hub, &log);
        let two = gateway(&hub, &log);
        let (alice, _a) = one.connect(room("abc"), "alice".into());
        let (_local, mut local_rx) = one.connect(room("abc"), "local".into());
        let (_remote, mut remote_rx) = two.connect(room("abc"), "remote".into());

        for i in 0..50 {
            one.on_message(&alice, frame("Alice", &i.to_string()));
        }
        for i in 0..50 {
            assert_eq!(next_event(&mut local_rx).await.body, Some(i.to_string()));
            assert_eq!(next_event(&mut remote_rx).await.body, Some(i.to_string()));
        }
    }
}
