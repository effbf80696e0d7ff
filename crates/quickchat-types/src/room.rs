use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on a room id; ids are opaque group identifiers, never free text
pub const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,
    #[error("room id exceeds 128 bytes")]
    TooLong,
    #[error("room id contains control characters")]
    ControlCharacters,
}

/// Identifier of a chat room (the group id of the CRUD layer).
///
/// Always trimmed and non-empty. Room access itself is authorized upstream,
/// so a well-formed id is all the gateway checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if trimmed.len() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(RoomIdError::ControlCharacters);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
