//! Wire-level vocabulary: typed events and payload guards.

pub mod events;
pub mod payload;

pub use events::{ClearEvent, DecodeError, DrawEvent, EmoteEvent, Inbound, Outbound, RoomKey, StrokeEvent};
pub use payload::{NormalizedPoint, PayloadError, Stroke, StrokeColor};
