//! Session state: presence, room selection, replication, and gestures.
//!
//! Everything here is synchronous and clock-free; callers pass `Instant`s in.

pub mod gesture;
pub mod presence;
pub mod replicator;
pub mod rooms;

pub use gesture::{Gesture, Pen};
pub use presence::{Presence, PresenceState, PresenceTimings, WaitingRooms};
pub use replicator::{Emit, Gate, InboundVerdict, ReplicationStats, Replicator, Suppression};
pub use rooms::{AckDisposition, RoomJoin};
