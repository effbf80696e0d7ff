use std::sync::Arc;

use quickchat_types::RoomId;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SessionId = Uuid;

/// A serialized outbound event, shared by every session it is queued to
pub type OutboundFrame = Arc<str>;

/// Receiving end of a session's outbound queue
pub type SessionReceiver = mpsc::Receiver<OutboundFrame>;

/// One live connection, bound to a single room for its whole lifetime
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub room_id: RoomId,
    /// Handshake identity; only ever logged
    pub identity: String,
}

impl Session {
    pub(crate) fn new(room_id: RoomId, identity: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            identity,
        }
    }
}
