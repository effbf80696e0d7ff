// ============================================================================
// Local room membership
// ============================================================================
//
// Rooms on this gateway and the outbound queues of their sessions. A room
// exists while it has at least one local member. The creation and removal
// hooks run under the registry lock, so fabric subscribe/unsubscribe calls
// follow membership transitions in order even when sessions join and leave
// concurrently.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use quickchat_types::RoomId;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::session::{OutboundFrame, SessionId};

type Members = HashMap<SessionId, mpsc::Sender<OutboundFrame>>;

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    /// Sessions whose outbound queue was full
    pub dropped: usize,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Members>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session; `on_created` runs when this is the room's first member
    pub fn join(
        &self,
        room: &RoomId,
        session: SessionId,
        outbound: mpsc::Sender<OutboundFrame>,
        on_created: impl FnOnce(&RoomId),
    ) {
        let mut rooms = self.write();
        let members = rooms.entry(room.clone()).or_insert_with(|| {
            on_created(room);
            Members::new()
        });
        members.insert(session, outbound);
    }

    /// Remove a session; `on_removed` runs when the room became empty
    pub fn leave(&self, room: &RoomId, session: SessionId, on_removed: impl FnOnce(&RoomId)) {
        let mut rooms = self.write();
        let Some(members) = rooms.get_mut(room) else {
            return;
        };
        if members.remove(&session).is_none() {
            return;
        }
        if members.is_empty() {
            rooms.remove(room);
            on_removed(room);
        }
    }

    /// Queue `frame` to every member of `room` except `exclude`. Never waits:
    /// a full queue drops the frame for that session only.
    pub fn fan_out(&self, room: &RoomId, frame: &OutboundFrame, exclude: Option<SessionId>) -> FanOut {
        let rooms = self.read();
        let Some(members) = rooms.get(room) else {
            return FanOut::default();
        };

        let mut outcome = FanOut::default();
        for (id, outbound) in members {
            if Some(*id) == exclude {
                continue;
            }
            match outbound.try_send(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => outcome.dropped += 1,
                // Session is tearing down; leave() will follow
                Err(TrySendError::Closed(_)) => {}
            }
        }
        outcome
    }

    pub fn room_count(&self) -> usize {
        self.read().len()
    }

    pub fn session_count(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    pub fn members(&self, room: &RoomId) -> usize {
        self.read().get(room).map_or(0, HashMap::len)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RoomId, Members>> {
        self.rooms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RoomId, Members>> {
        self.rooms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn frame(text: &str) -> OutboundFrame {
        Arc::from(text)
    }

    #[test]
    fn test_room_lifecycle_hooks() {
        let registry = RoomRegistry::new();
        let abc = room("abc");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx, _rx) = mpsc::channel(4);

        let mut created = 0;
        registry.join(&abc, a, tx.clone(), |_| created += 1);
        registry.join(&abc, b, tx, |_| created += 1);
        assert_eq!(created, 1);
        assert_eq!(registry.members(&abc), 2);

        let mut removed = 0;
        registry.leave(&abc, a, |_| removed += 1);
        assert_eq!(removed, 0);
        registry.leave(&abc, b, |_| removed += 1);
        assert_eq!(removed, 1);
        assert_eq!(registry.room_count(), 0);

        // Unknown session is a no-op
        registry.leave(&abc, b, |_| removed += 1);
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_fan_out_excludes_sender_and_other_rooms() {
        let registry = RoomRegistry::new();
        let (sender, peer, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (sender_tx, mut sender_rx) = mpsc::channel(4);
        let (peer_tx, mut peer_rx) = mpsc::channel(4);
        let (stranger_tx, mut stranger_rx) = mpsc::channel(4);

        registry.join(&room("abc"), sender, sender_tx, |_| {});
        registry.join(&room("abc"), peer, peer_tx, |_| {});
        registry.join(&room("xyz"), stranger, stranger_tx, |_| {});

        let outcome = registry.fan_out(&room("abc"), &frame("hi"), Some(sender));
        assert_eq!(outcome, FanOut { delivered: 1, dropped: 0 });

        assert_eq!(&*peer_rx.try_recv().unwrap(), "hi");
        assert!(sender_rx.try_recv().is_err());
        assert!(stranger_rx.try_recv().is_err());
        assert_eq!(registry.session_count(), 3);
    }

    #[test]
    fn test_full_queue_drops_for_that_session_only() {
        let registry = RoomRegistry::new();
        let (slow, fast) = (Uuid::new_v4(), Uuid::new_v4());
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.join(&room("abc"), slow, slow_tx, |_| {});
        registry.join(&room("abc"), fast, fast_tx, |_| {});

        registry.fan_out(&room("abc"), &frame("1"), None);
        let outcome = registry.fan_out(&room("abc"), &frame("2"), None);

        assert_eq!(outcome, FanOut { delivered: 1, dropped: 1 });
        assert_eq!(&*fast_rx.try_recv().unwrap(), "1");
        assert_eq!(&*fast_rx.try_recv().unwrap(), "2");
    }
}
