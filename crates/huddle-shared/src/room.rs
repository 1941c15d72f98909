//! Room naming.
//!
//! The general room is a fixed name; DM rooms are derived from the two member
//! identities so both sides compute the same id without coordination.

use crate::constants::{DM_ROOM_PREFIX, GENERAL_ROOM};
use crate::error::RoomError;

/// Canonical DM room for a pair of identities: `dm:<low>:<high>` in
/// lexicographic order.
pub fn derive_dm_room(a: &str, b: &str) -> Result<String, RoomError> {
    if a.is_empty() || b.is_empty() {
        return Err(RoomError::InvalidDmTarget("Missing target user."));
    }
    if a == b {
        return Err(RoomError::InvalidDmTarget(
            "Cannot start a direct message with yourself.",
        ));
    }

    let (low, high) = if a < b { (a, b) } else { (b, a) };
    Ok(format!("{DM_ROOM_PREFIX}:{low}:{high}"))
}

/// Resolve the room named by an event's `conversationId`, defaulting to
/// general when it is absent or blank.
pub fn resolve_room(conversation_id: Option<&str>) -> &str {
    match conversation_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => GENERAL_ROOM,
    }
}

pub fn is_general(room: &str) -> bool {
    room == GENERAL_ROOM
}
