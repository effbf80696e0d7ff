// ============================================================================
// QuickChat Types - Core Data Types
// ============================================================================
//
// Data structures shared by the gateway, the broadcast fabric, the durable
// log and the persistence worker. No I/O, no business logic.
//
// Dependencies:
// - serde (serialization only)
// - chrono (timestamps)
//
// ============================================================================

pub mod event;
pub mod room;

pub use event::{ChatEvent, ChatFrame};
pub use room::{MAX_ROOM_ID_LEN, RoomId, RoomIdError};
