//! Room selection and join-acknowledgement reconciliation.
//!
//! The selected room is the single source of truth for "which room is
//! active"; handlers read it at dispatch time instead of capturing it.
//! Joins are fire-and-forget. A room switch abandons the previous in-flight
//! join, so its late acknowledgement can be told apart from an ack the
//! server sends for a room the user never picked locally.
//!
//! The server answers joins in the order they were sent, so abandoned joins
//! are kept oldest first. A rejection while joining settles the oldest
//! pending join: the first abandoned room if any, otherwise the in-flight
//! one. The abandoned list is also capped so rooms the server never answers
//! cannot pile up for the life of the session.

use std::collections::VecDeque;

use tracing::debug;

use crate::protocol::{Outbound, RoomKey};

/// Upper bound on remembered abandoned joins. The oldest is forgotten first.
pub const MAX_ABANDONED_JOINS: usize = 16;

/// What to do with an inbound `room.joined`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckDisposition {
    /// Ack for the selected room.
    Current,
    /// Ack for a room that was not selected; it becomes the selection.
    Adopted { previous: Option<RoomKey> },
    /// Late ack for a join abandoned by a local room switch.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct RoomJoin {
    selected: Option<RoomKey>,
    in_flight: Option<RoomKey>,
    abandoned: VecDeque<RoomKey>,
}

impl RoomJoin {
    #[must_use]
    pub fn selected(&self) -> Option<&RoomKey> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&RoomKey> {
        self.in_flight.as_ref()
    }

    #[must_use]
    pub fn is_selected(&self, room: &RoomKey) -> bool {
        self.selected.as_ref() == Some(room)
    }

    /// Change the selection. Returns the previous selection.
    ///
    /// An in-flight join for a different room is abandoned.
    pub fn select(&mut self, room: Option<RoomKey>) -> Option<RoomKey> {
        if let Some(pending) = self.in_flight.take() {
            if room.as_ref() != Some(&pending) {
                debug!(room = %pending, "abandoning in-flight join");
                self.abandon(pending);
            } else {
                self.in_flight = Some(pending);
            }
        }
        if let Some(room) = &room {
            self.forget_abandoned(room);
        }
        std::mem::replace(&mut self.selected, room)
    }

    /// Build a join for the selected room, if any, and mark it in flight.
    pub fn join_selected(&mut self) -> Option<Outbound> {
        let room = self.selected.clone()?;
        Some(self.join(room))
    }

    /// Build a join for `room` without selecting it. The server's ack will
    /// adopt it.
    pub fn join(&mut self, room: RoomKey) -> Outbound {
        self.forget_abandoned(&room);
        self.in_flight = Some(room.clone());
        Outbound::Join { room_key: room }
    }

    /// Reconcile an inbound join acknowledgement for `room`.
    pub fn reconcile_ack(&mut self, room: &RoomKey) -> AckDisposition {
        if self.is_selected(room) {
            if self.in_flight.as_ref() == Some(room) {
                self.in_flight = None;
            }
            return AckDisposition::Current;
        }
        if self.forget_abandoned(room) {
            return AckDisposition::Ignored;
        }
        if self.in_flight.as_ref() == Some(room) {
            self.in_flight = None;
        }
        let previous = self.select(Some(room.clone()));
        AckDisposition::Adopted { previous }
    }

    /// The server rejected a join. Settles the oldest pending join and
    /// returns its room.
    pub fn join_rejected(&mut self) -> Option<RoomKey> {
        let settled = self.abandoned.pop_front().or_else(|| self.in_flight.take());
        if let Some(room) = &settled {
            debug!(%room, "join rejected");
        }
        settled
    }

    #[must_use]
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }

    fn abandon(&mut self, room: RoomKey) {
        if self.abandoned.contains(&room) {
            return;
        }
        if self.abandoned.len() == MAX_ABANDONED_JOINS {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(room);
    }

    fn forget_abandoned(&mut self, room: &RoomKey) -> bool {
        let before = self.abandoned.len();
        self.abandoned.retain(|pending| pending != room);
        self.abandoned.len() != before
    }

    /// Forget everything, e.g. on sign-out.
    pub fn clear(&mut self) {
        self.selected = None;
        self.in_flight = None;
        self.abandoned.clear();
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
