//! Peer presence state machine.
//!
//! DESIGN
//! ======
//! Four states: `NotJoined → Joining → Waiting ⇄ Paired`, with any state able
//! to fall back to `NotJoined`. Transitions are methods that return the new
//! state only when it actually changed, so callers can log and notify on
//! edges without diffing.
//!
//! Staying in `Waiting` for `waiting_grace` raises the reconnect-available
//! signal, once per arming. A manual reconnect clears the signal and starts
//! a cool-down; when the cool-down ends the grace timer re-arms from that
//! instant if the machine is still `Waiting`. Time is always passed in, never
//! read, so tests drive it with synthetic instants.
//!
//! `WaitingRooms` is separate: it remembers which *other* rooms have a peer
//! waiting, independent of the machine.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::protocol::RoomKey;

pub const DEFAULT_WAITING_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTimings {
    pub waiting_grace: Duration,
    pub reconnect_cooldown: Duration,
}

impl Default for PresenceTimings {
    fn default() -> Self {
        Self {
            waiting_grace: DEFAULT_WAITING_GRACE,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceState {
    #[default]
    NotJoined,
    Joining,
    Waiting,
    Paired,
}

impl PresenceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotJoined => "not_joined",
            Self::Joining => "joining",
            Self::Waiting => "waiting",
            Self::Paired => "paired",
        }
    }

    /// Joined to the room, with or without the peer.
    #[must_use]
    pub fn is_joined(self) -> bool {
        matches!(self, Self::Waiting | Self::Paired)
    }
}

#[derive(Debug, Clone)]
pub struct Presence {
    state: PresenceState,
    timings: PresenceTimings,
    /// Start of the current grace period; `None` while disarmed.
    armed_at: Option<Instant>,
    cooldown_until: Option<Instant>,
    reconnect_available: bool,
}

impl Presence {
    #[must_use]
    pub fn new(timings: PresenceTimings) -> Self {
        Self {
            state: PresenceState::NotJoined,
            timings,
            armed_at: None,
            cooldown_until: None,
            reconnect_available: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> PresenceState {
        self.state
    }

    #[must_use]
    pub fn reconnect_available(&self) -> bool {
        self.reconnect_available
    }

    #[must_use]
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// A join was emitted.
    pub fn begin_join(&mut self, now: Instant) -> Option<PresenceState> {
        self.set(PresenceState::Joining, now)
    }

    /// The join was acknowledged.
    pub fn acknowledge(&mut self, peer_present: bool, now: Instant) -> Option<PresenceState> {
        let next = if peer_present { PresenceState::Paired } else { PresenceState::Waiting };
        self.set(next, now)
    }

    /// The peer announced itself or was seen drawing in the selected room.
    pub fn peer_seen(&mut self, now: Instant) -> Option<PresenceState> {
        match self.state {
            PresenceState::Joining | PresenceState::Waiting => self.set(PresenceState::Paired, now),
            PresenceState::NotJoined | PresenceState::Paired => None,
        }
    }

    /// The peer left, or the server reported that the room is no longer
    /// shared.
    pub fn peer_gone(&mut self, now: Instant) -> Option<PresenceState> {
        match self.state {
            PresenceState::Paired => self.set(PresenceState::Waiting, now),
            _ => None,
        }
    }

    /// The pending join was refused by the server.
    pub fn join_rejected(&mut self, now: Instant) -> Option<PresenceState> {
        match self.state {
            PresenceState::Joining => self.set(PresenceState::NotJoined, now),
            _ => None,
        }
    }

    /// Room switch, de-selection, logout or transport loss.
    pub fn reset(&mut self, now: Instant) -> Option<PresenceState> {
        self.set(PresenceState::NotJoined, now)
    }

    fn set(&mut self, next: PresenceState, now: Instant) -> Option<PresenceState> {
        if next == self.state {
            return None;
        }
        self.state = next;
        self.reconnect_available = false;
        self.armed_at = (next == PresenceState::Waiting).then_some(now);
        if next != PresenceState::Waiting {
            self.cooldown_until = None;
        }
        Some(next)
    }

    // =========================================================================
    // RECONNECT SIGNAL
    // =========================================================================

    /// User-initiated reconnect: clear the signal and start the cool-down.
    pub fn manual_reconnect(&mut self, now: Instant) {
        self.reconnect_available = false;
        self.armed_at = None;
        self.cooldown_until = Some(now + self.timings.reconnect_cooldown);
    }

    /// Advance timers. Returns `true` when the reconnect-available signal
    /// was raised by this call.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return false;
            }
            self.cooldown_until = None;
            if self.state == PresenceState::Waiting {
                self.armed_at = Some(until);
            }
        }

        if self.state != PresenceState::Waiting || self.reconnect_available {
            return false;
        }
        let Some(armed_at) = self.armed_at else {
            return false;
        };
        if now.saturating_duration_since(armed_at) >= self.timings.waiting_grace {
            self.reconnect_available = true;
            self.armed_at = None;
            return true;
        }
        false
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new(PresenceTimings::default())
    }
}

// =============================================================================
// WAITING ROOMS
// =============================================================================

/// Rooms other than the selected one where the peer is waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitingRooms(BTreeSet<RoomKey>);

impl WaitingRooms {
    /// Returns `true` if the room was newly flagged.
    pub fn mark(&mut self, room: RoomKey) -> bool {
        self.0.insert(room)
    }

    /// Returns `true` if a flag was removed.
    pub fn clear(&mut self, room: &RoomKey) -> bool {
        self.0.remove(room)
    }

    pub fn clear_all(&mut self) -> bool {
        let had_any = !self.0.is_empty();
        self.0.clear();
        had_any
    }

    #[must_use]
    pub fn contains(&self, room: &RoomKey) -> bool {
        self.0.contains(room)
    }

    #[must_use]
    pub fn rooms(&self) -> Vec<RoomKey> {
        self.0.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
