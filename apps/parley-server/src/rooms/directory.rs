//! Room directory feed: a read-only view of active rooms for discovery UIs.
//!
//! Always derived from the room store on demand; nothing here is stored.

use parley_common::Timestamp;
use serde::Serialize;

use super::room::Room;

/// One row of the `activeRooms` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub name: String,
    pub owner: Option<String>,
    pub member_count: usize,
    pub created_at: Timestamp,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            name: room.name.clone(),
            owner: room.owner.clone(),
            member_count: room.member_count(),
            created_at: room.created_at,
        }
    }
}

/// Build a snapshot from a set of rooms, ordered by room name.
pub fn snapshot<'a>(rooms: impl IntoIterator<Item = &'a Room>) -> Vec<RoomSummary> {
    let mut summaries: Vec<RoomSummary> = rooms.into_iter().map(RoomSummary::from).collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}
