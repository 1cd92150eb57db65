//! Drawing-event replication rules.
//!
//! Outbound events pass a gate before anything is built: signed in, a room
//! selected, the link up, and the peer present. A closed gate is a no-op that
//! tells the caller which condition failed. Inbound events are filtered by
//! room identity against the selection at dispatch time, and the local
//! user's own echoes are dropped. Duplicates are not filtered.

use tracing::debug;

use super::presence::PresenceState;
use crate::protocol::payload::{NormalizedPoint, PayloadError, Stroke, check_emoji};
use crate::protocol::{ClearEvent, DrawEvent, EmoteEvent, Outbound, RoomKey, StrokeEvent};
use crate::state::gesture::Pen;

/// Why an outbound drawing event was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    SignedOut,
    NoActiveRoom,
    Offline,
    PeerAbsent,
}

/// Result of an outbound drawing call.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    Sent,
    Suppressed(Suppression),
    Rejected(PayloadError),
}

impl Emit {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Everything the outbound gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct Gate<'a> {
    pub user_id: Option<&'a str>,
    pub room: Option<&'a RoomKey>,
    pub online: bool,
    pub presence: PresenceState,
}

/// How an inbound drawing event was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundVerdict {
    Deliver,
    ForeignRoom,
    SelfEcho,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub sent: u64,
    pub suppressed: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub foreign_room: u64,
    pub self_echo: u64,
    pub malformed: u64,
}

#[derive(Debug, Default)]
pub struct Replicator {
    stats: ReplicationStats,
}

impl Replicator {
    #[must_use]
    pub fn stats(&self) -> ReplicationStats {
        self.stats
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn open<'a>(&mut self, gate: &Gate<'a>) -> Result<(&'a str, &'a RoomKey), Suppression> {
        let result = match (gate.user_id, gate.room) {
            (None, _) => Err(Suppression::SignedOut),
            (Some(_), None) => Err(Suppression::NoActiveRoom),
            (Some(_), Some(_)) if !gate.online => Err(Suppression::Offline),
            (Some(_), Some(_)) if gate.presence != PresenceState::Paired => Err(Suppression::PeerAbsent),
            (Some(user), Some(room)) => Ok((user, room)),
        };
        if let Err(reason) = result {
            self.stats.suppressed += 1;
            debug!(?reason, presence = gate.presence.as_str(), "outbound drawing event suppressed");
        }
        result
    }

    /// Build a stroke event for the segment `from → to` drawn with `pen`.
    ///
    /// # Errors
    ///
    /// Returns [`Emit::Suppressed`] when the gate is closed and
    /// [`Emit::Rejected`] when the pen has an invalid width.
    pub fn stroke(
        &mut self,
        gate: &Gate<'_>,
        from: NormalizedPoint,
        to: NormalizedPoint,
        pen: &Pen,
    ) -> Result<Outbound, Emit> {
        let (user, room) = self.open(gate).map_err(Emit::Suppressed)?;
        let stroke = Stroke::new(from, to, pen.color.clone(), pen.width, pen.style.clone()).map_err(|e| {
            self.stats.rejected += 1;
            Emit::Rejected(e)
        })?;
        Ok(Outbound::Draw(DrawEvent::Stroke(StrokeEvent {
            room_key: room.clone(),
            stroke,
            user_id: user.to_owned(),
        })))
    }

    /// # Errors
    ///
    /// Returns [`Emit::Suppressed`] when the gate is closed.
    pub fn clear(&mut self, gate: &Gate<'_>) -> Result<Outbound, Emit> {
        let (user, room) = self.open(gate).map_err(Emit::Suppressed)?;
        Ok(Outbound::Draw(DrawEvent::Clear(ClearEvent { room_key: room.clone(), user_id: user.to_owned() })))
    }

    /// # Errors
    ///
    /// Returns [`Emit::Suppressed`] when the gate is closed and
    /// [`Emit::Rejected`] for a blank or overlong emoji.
    pub fn emote(&mut self, gate: &Gate<'_>, emoji: &str) -> Result<Outbound, Emit> {
        let (user, room) = self.open(gate).map_err(Emit::Suppressed)?;
        let emoji = check_emoji(emoji).map_err(|e| {
            self.stats.rejected += 1;
            Emit::Rejected(e)
        })?;
        Ok(Outbound::Draw(DrawEvent::Emote(EmoteEvent {
            room_key: room.clone(),
            emoji,
            user_id: user.to_owned(),
        })))
    }

    /// Record the link's verdict on a built event.
    pub fn record_send(&mut self, delivered_to_link: bool) -> Emit {
        if delivered_to_link {
            self.stats.sent += 1;
            Emit::Sent
        } else {
            self.stats.suppressed += 1;
            Emit::Suppressed(Suppression::Offline)
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Classify an inbound drawing event against the current selection.
    pub fn inbound(&mut self, event: &DrawEvent, selected: Option<&RoomKey>, local_user: Option<&str>) -> InboundVerdict {
        if selected != Some(event.room_key()) {
            self.stats.foreign_room += 1;
            debug!(room = %event.room_key(), "dropping drawing event for non-selected room");
            return InboundVerdict::ForeignRoom;
        }
        if local_user == Some(event.user_id()) {
            self.stats.self_echo += 1;
            return InboundVerdict::SelfEcho;
        }
        self.stats.delivered += 1;
        InboundVerdict::Deliver
    }

    pub fn record_malformed(&mut self) {
        self.stats.malformed += 1;
    }
}

#[cfg(test)]
#[path = "replicator_test.rs"]
mod tests;
