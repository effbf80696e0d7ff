// ============================================================================
// Cross-Instance Broadcast Fabric
// ============================================================================
//
// Every gateway publishes the events of its sessions here and receives the
// events of the rooms it has local members in. Delivery is best-effort and
// at-most-once per subscriber, with no replay for late joiners.
//
// `join`, `leave` and `publish` never block: each implementation applies
// them on a background task in call order, so subscription changes and
// publishes from one gateway reach the fabric in the order they happened.
//
// ============================================================================

pub mod memory;
pub mod redis;

pub use memory::{MemoryFabric, MemoryFabricHub};
pub use redis::RedisFabric;

use quickchat_types::{ChatEvent, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What travels on the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricEnvelope {
    /// Instance id of the publishing gateway
    pub origin: String,
    pub room_id: RoomId,
    pub event: ChatEvent,
}

impl FabricEnvelope {
    pub fn new(origin: impl Into<String>, event: ChatEvent) -> Self {
        Self {
            origin: origin.into(),
            room_id: event.room_id.clone(),
            event,
        }
    }
}

/// Envelopes delivered for the rooms this gateway joined
pub type FabricDeliveries = mpsc::UnboundedReceiver<FabricEnvelope>;

#[async_trait::async_trait]
pub trait BroadcastFabric: Send + Sync {
    /// Start receiving envelopes for `room`
    fn join(&self, room: &RoomId);

    /// Stop receiving envelopes for `room`
    fn leave(&self, room: &RoomId);

    /// Send an envelope to every gateway that joined its room
    fn publish(&self, envelope: FabricEnvelope);

    /// Deliver pending publishes and release connections
    async fn close(&self);
}
