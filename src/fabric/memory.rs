//! In-process broadcast fabric.
//!
//! One `tokio::sync::broadcast` channel per hub; every attached gateway
//! receives all envelopes and keeps only those of rooms it joined. Used for
//! single-node deployments (`FABRIC_MODE=memory`) and for wiring several
//! gateways together in tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use quickchat_types::RoomId;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BroadcastFabric, FabricDeliveries, FabricEnvelope};

/// Slow gateways that fall this far behind skip envelopes (Lagged)
const HUB_CAPACITY: usize = 4096;

/// Shared hub; cloneable
#[derive(Clone)]
pub struct MemoryFabricHub {
    sender: broadcast::Sender<Arc<FabricEnvelope>>,
}

impl MemoryFabricHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Connect one gateway to the hub
    pub fn attach(&self) -> (MemoryFabric, FabricDeliveries) {
        let joined: Arc<Mutex<HashSet<RoomId>>> = Arc::default();
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(forward(
            self.sender.subscribe(),
            joined.clone(),
            tx,
            shutdown.clone(),
        ));

        let fabric = MemoryFabric {
            sender: self.sender.clone(),
            joined,
            shutdown,
        };
        (fabric, rx)
    }
}

impl Default for MemoryFabricHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryFabric {
    sender: broadcast::Sender<Arc<FabricEnvelope>>,
    joined: Arc<Mutex<HashSet<RoomId>>>,
    shutdown: CancellationToken,
}

impl MemoryFabric {
    fn joined(&self) -> std::sync::MutexGuard<'_, HashSet<RoomId>> {
        self.joined
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl BroadcastFabric for MemoryFabric {
    fn join(&self, room: &RoomId) {
        self.joined().insert(room.clone());
    }

    fn leave(&self, room: &RoomId) {
        self.joined().remove(room);
    }

    fn publish(&self, envelope: FabricEnvelope) {
        // send() only fails when no gateway is attached
        let _ = self.sender.send(Arc::new(envelope));
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn forward(
    mut hub: broadcast::Receiver<Arc<FabricEnvelope>>,
    joined: Arc<Mutex<HashSet<RoomId>>>,
    deliveries: mpsc::UnboundedSender<FabricEnvelope>,
    shutdown: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hub.recv() => match received {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Memory fabric receiver lagged, envelopes dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let wanted = joined
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&envelope.room_id);
        if !wanted {
            continue;
        }

        if deliveries.send(envelope.as_ref().clone()).is_err() {
            break;
        }
    }
    debug!("Memory fabric forwarder stopped");
}
