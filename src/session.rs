//! Realtime drawing session: one identity, one connection, one selected room.
//!
//! ARCHITECTURE
//! ============
//! `Session` ties the pieces together and is the only place that mutates
//! them. It is driven from a single task (see `driver`): link events, user
//! commands, and the housekeeping tick all arrive as `&mut self` calls with
//! an explicit `now`, so ordering is the order of the calls and tests can
//! run the whole protocol without a runtime or a socket.
//!
//! ```text
//!   host / CLI ──commands──▶ Session ──frames──▶ ConnectionManager ──▶ Link
//!        ▲                     │  ▲                                     │
//!        └──SessionObserver────┘  └────────────LinkEvent────────────────┘
//! ```
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal. Malformed inbound frames are dropped with a debug
//! log. Server-side errors become notices, and the ones that carry room
//! semantics also move presence. Only an authorization failure tears the
//! connection down: the session forgets its identity and reports itself
//! expired.

use std::time::Instant;

use frames::Frame;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::net::connection::{ConnectionManager, Connector, Credential, Endpoint, Link, LinkEvent};
use crate::notice::Notice;
use crate::protocol::payload::NormalizedPoint;
use crate::protocol::{ClearEvent, DrawEvent, EmoteEvent, Inbound, Outbound, RoomKey, StrokeEvent};
use crate::state::{
    AckDisposition, Emit, Gate, Gesture, InboundVerdict, Pen, Presence, PresenceState, ReplicationStats, Replicator,
    RoomJoin, WaitingRooms,
};

pub const SESSION_EXPIRED_NOTICE: &str = "Session expired. Please log in again.";
const NOT_IN_ROOM: &str = "not in a room";
const UNAUTHORIZED_REASON: &str = "Unauthorized";

/// Callbacks into the presentation layer. Every method defaults to a no-op.
pub trait SessionObserver {
    fn presence_changed(&mut self, _state: PresenceState) {}
    fn reconnect_available(&mut self, _available: bool) {}
    fn connection_changed(&mut self, _online: bool) {}
    fn room_activated(&mut self, _room: Option<&RoomKey>) {}
    fn waiting_rooms_changed(&mut self, _rooms: &[RoomKey]) {}
    fn stroke(&mut self, _event: &StrokeEvent) {}
    fn clear(&mut self, _event: &ClearEvent) {}
    fn emote(&mut self, _event: &EmoteEvent) {}
    fn chat_requested(&mut self, _request_id: &str, _from_display_name: &str, _message: &str) {}
    fn notice(&mut self, _notice: &Notice) {}
    fn session_expired(&mut self) {}
}

/// Who is signed in: the credential that authenticates the socket and the
/// user id stamped on outbound drawing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub credential: Credential,
    pub user_id: String,
}

impl Identity {
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a blank or unusable token, or a blank
    /// user id.
    pub fn new(token: &str, user_id: &str) -> Result<Self, ConfigError> {
        let credential = Credential::parse(token)?;
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ConfigError::MissingUserId);
        }
        Ok(Self { credential, user_id: user_id.to_owned() })
    }
}

pub struct Session<C: Connector, O: SessionObserver> {
    endpoint: Endpoint,
    manager: ConnectionManager<C>,
    observer: O,
    identity: Option<Identity>,
    online: bool,
    connect_failure_reported: bool,
    presence: Presence,
    waiting_rooms: WaitingRooms,
    rooms: RoomJoin,
    replicator: Replicator,
    gesture: Gesture,
    pen: Pen,
}

impl<C: Connector, O: SessionObserver> Session<C, O> {
    pub fn new(config: &ClientConfig, connector: C, observer: O) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            manager: ConnectionManager::new(connector, config.backoff, config.timeouts),
            observer,
            identity: None,
            online: false,
            connect_failure_reported: false,
            presence: Presence::new(config.presence),
            waiting_rooms: WaitingRooms::default(),
            rooms: RoomJoin::default(),
            replicator: Replicator::default(),
            gesture: Gesture::default(),
            pen: Pen::default(),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager<C> {
        &mut self.manager
    }

    pub fn presence(&self) -> PresenceState {
        self.presence.state()
    }

    pub fn reconnect_available(&self) -> bool {
        self.presence.reconnect_available()
    }

    pub fn selected_room(&self) -> Option<&RoomKey> {
        self.rooms.selected()
    }

    pub fn waiting_rooms(&self) -> Vec<RoomKey> {
        self.waiting_rooms.rooms()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn stats(&self) -> ReplicationStats {
        self.replicator.stats()
    }

    pub fn set_pen(&mut self, pen: Pen) {
        self.pen = pen;
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Bind the session to `identity` and make sure its connection exists.
    ///
    /// Signing in again with the same credential reuses the connection. A
    /// different credential replaces it.
    pub fn sign_in(&mut self, identity: Identity, now: Instant) {
        let same = self.identity.as_ref().is_some_and(|current| current.credential == identity.credential);
        if !same && self.identity.is_some() {
            self.drop_connection(now);
        }
        info!(user_id = %identity.user_id, reused = same, "signing in");
        let connection = self.manager.acquire(&self.endpoint, &identity.credential);
        let link_up = connection.link().is_connected();
        self.identity = Some(identity);

        if same && link_up && self.presence.state() == PresenceState::NotJoined {
            self.emit_join(now);
        }
    }

    /// Forget the identity and tear down the connection.
    pub fn sign_out(&mut self, now: Instant) {
        if self.identity.is_none() {
            return;
        }
        info!("signing out");
        self.drop_connection(now);
        self.identity = None;
        self.clear_rooms();
    }

    /// Authorization was rejected somewhere: sign out and tell the user.
    pub fn expire(&mut self, now: Instant) {
        warn!("session expired");
        self.sign_out(now);
        self.observer.session_expired();
        self.notify(Notice::error(SESSION_EXPIRED_NOTICE));
    }

    fn drop_connection(&mut self, now: Instant) {
        self.manager.release();
        self.gesture.up();
        self.set_online(false);
        self.update_presence(now, |p, now| p.reset(now));
    }

    fn clear_rooms(&mut self) {
        let had_room = self.rooms.selected().is_some();
        self.rooms.clear();
        if had_room {
            self.observer.room_activated(None);
        }
        if self.waiting_rooms.clear_all() {
            self.observer.waiting_rooms_changed(&[]);
        }
    }

    // =========================================================================
    // ROOM SELECTION
    // =========================================================================

    /// Switch the active room. `None` leaves the current room.
    pub fn select_room(&mut self, room: Option<RoomKey>, now: Instant) {
        if self.rooms.selected() == room.as_ref() {
            return;
        }
        self.update_presence(now, |p, now| p.reset(now));
        self.gesture.up();
        let previous = self.rooms.select(room.clone());
        info!(
            from = previous.as_ref().map(RoomKey::as_str),
            to = room.as_ref().map(RoomKey::as_str),
            "room selection changed"
        );

        if let Some(room) = &room {
            self.clear_waiting(room);
        }
        self.observer.room_activated(room.as_ref());

        match room {
            Some(_) => self.emit_join(now),
            None if previous.is_some() && self.online => {
                self.manager.send(Outbound::Leave.to_frame());
            }
            None => {}
        }
    }

    /// Re-issue the join for the selected room and start the reconnect
    /// cool-down.
    pub fn reconnect(&mut self, now: Instant) {
        let had_signal = self.presence.reconnect_available();
        self.presence.manual_reconnect(now);
        if had_signal {
            self.observer.reconnect_available(false);
        }
        if self.manager.reconnect_if_down() {
            debug!("manual reconnect: link down, retry requested");
            return;
        }
        self.emit_join(now);
    }

    /// The host regained foreground visibility.
    pub fn foreground(&mut self) {
        if self.identity.is_some() && self.manager.reconnect_if_down() {
            debug!("foregrounded with link down; reconnecting now");
        }
    }

    /// Send a join for the selected room if the link is up.
    fn emit_join(&mut self, now: Instant) {
        if self.identity.is_none() || !self.online {
            return;
        }
        let Some(join) = self.rooms.join_selected() else {
            return;
        };
        if !self.manager.send(join.to_frame()) {
            debug!("join not sent: link down");
            return;
        }
        debug!(room = ?self.rooms.selected().map(RoomKey::as_str), "join emitted");
        if self.presence.state() == PresenceState::NotJoined {
            self.update_presence(now, |p, now| p.begin_join(now));
        }
    }

    fn clear_waiting(&mut self, room: &RoomKey) {
        if self.waiting_rooms.clear(room) {
            let rooms = self.waiting_rooms.rooms();
            self.observer.waiting_rooms_changed(&rooms);
        }
    }

    // =========================================================================
    // OUTBOUND DRAWING
    // =========================================================================

    pub fn pointer_down(&mut self, at: NormalizedPoint) {
        if self.presence.state().is_joined() {
            self.gesture.down(at);
        }
    }

    /// Extend the current gesture. Returns the emit outcome of the segment,
    /// or `None` when no gesture is in progress.
    pub fn pointer_move(&mut self, to: NormalizedPoint) -> Option<Emit> {
        if !self.presence.state().is_joined() {
            self.gesture.up();
            return None;
        }
        let (from, to) = self.gesture.move_to(to)?;
        Some(self.emit_stroke(from, to))
    }

    pub fn pointer_up(&mut self) {
        self.gesture.up();
    }

    pub fn emit_stroke(&mut self, from: NormalizedPoint, to: NormalizedPoint) -> Emit {
        let gate = gate(self.identity.as_ref(), &self.rooms, self.online, &self.presence);
        let built = self.replicator.stroke(&gate, from, to, &self.pen);
        self.send_built(built)
    }

    pub fn emit_clear(&mut self) -> Emit {
        let gate = gate(self.identity.as_ref(), &self.rooms, self.online, &self.presence);
        let built = self.replicator.clear(&gate);
        self.send_built(built)
    }

    pub fn emit_emote(&mut self, emoji: &str) -> Emit {
        let gate = gate(self.identity.as_ref(), &self.rooms, self.online, &self.presence);
        let built = self.replicator.emote(&gate, emoji);
        self.send_built(built)
    }

    fn send_built(&mut self, built: Result<Outbound, Emit>) -> Emit {
        match built {
            Ok(event) => {
                let delivered = self.manager.send(event.to_frame());
                self.replicator.record_send(delivered)
            }
            Err(outcome) => outcome,
        }
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Advance presence timers.
    pub fn tick(&mut self, now: Instant) {
        if self.presence.tick(now) {
            info!(room = ?self.rooms.selected().map(RoomKey::as_str), "peer still absent; reconnect available");
            self.observer.reconnect_available(true);
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle every link event already queued. Returns how many were handled.
    pub fn drain_link_events(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Some(event) = self.manager.try_next_event() {
            self.handle_link_event(event, now);
            handled += 1;
        }
        handled
    }

    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Connected => {
                self.connect_failure_reported = false;
                self.set_online(true);
                self.emit_join(now);
            }
            LinkEvent::Disconnected { reason } => {
                info!(%reason, "realtime link lost");
                self.gesture.up();
                self.set_online(false);
                self.update_presence(now, |p, now| p.reset(now));
            }
            LinkEvent::ConnectFailed { reason } => {
                if !self.connect_failure_reported {
                    self.connect_failure_reported = true;
                    self.notify(Notice::error(format!("Realtime connection failed: {reason}")));
                }
            }
            LinkEvent::Unauthorized => self.expire(now),
            LinkEvent::Frame(frame) => self.handle_frame(&frame, now),
        }
    }

    fn handle_frame(&mut self, frame: &Frame, now: Instant) {
        let inbound = match Inbound::decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                if frame.namespace() == "draw" {
                    self.replicator.record_malformed();
                }
                debug!(event = %frame.event, error = %e, "dropping inbound frame");
                return;
            }
        };

        match inbound {
            Inbound::RoomJoined { room_key, peer_ids } => self.on_room_joined(&room_key, &peer_ids, now),
            Inbound::PeerJoined { user_id } => {
                if !self.is_local_user(&user_id) {
                    self.update_presence(now, |p, now| p.peer_seen(now));
                }
            }
            Inbound::PeerLeft { user_id } => {
                if !self.is_local_user(&user_id) {
                    self.update_presence(now, |p, now| p.peer_gone(now));
                }
            }
            Inbound::PeerWaiting { room_key, user_id } => self.on_peer_waiting(room_key, &user_id, now),
            Inbound::Draw(event) => self.on_draw(&event, now),
            Inbound::TransportError { message, status_code } => self.on_transport_error(&message, status_code, now),
            Inbound::ConnectError { reason } => {
                if reason == UNAUTHORIZED_REASON {
                    self.expire(now);
                } else {
                    self.notify(Notice::error(format!("Realtime connection failed: {reason}")));
                }
            }
            Inbound::ChatRequested { request_id, from_display_name, message, .. } => {
                self.observer.chat_requested(&request_id, &from_display_name, &message);
                self.notify(Notice::info(format!("{from_display_name} sent you a chat request.")));
            }
            Inbound::ChatResponse { request_id, accepted, room_key } => {
                debug!(%request_id, accepted, "chat request answered");
                if let Some(room) = room_key.filter(|_| accepted) {
                    self.join_accepted(room);
                }
            }
        }
    }

    fn on_room_joined(&mut self, room: &RoomKey, peer_ids: &[String], now: Instant) {
        match self.rooms.reconcile_ack(room) {
            AckDisposition::Ignored => {
                debug!(%room, "ignoring late join ack for abandoned room");
                return;
            }
            AckDisposition::Adopted { previous } => {
                info!(%room, previous = previous.as_ref().map(RoomKey::as_str), "adopting joined room");
                self.gesture.up();
                self.update_presence(now, |p, now| p.reset(now));
                self.observer.room_activated(Some(room));
            }
            AckDisposition::Current => {}
        }
        self.clear_waiting(room);

        let peer_present = peer_ids.iter().any(|id| !self.is_local_user(id));
        info!(%room, peers = peer_ids.len(), "room joined");
        self.update_presence(now, |p, now| p.acknowledge(peer_present, now));
    }

    fn on_peer_waiting(&mut self, room: RoomKey, user_id: &str, now: Instant) {
        if self.is_local_user(user_id) {
            return;
        }
        if self.rooms.is_selected(&room) {
            self.update_presence(now, |p, now| p.peer_seen(now));
            return;
        }
        if self.waiting_rooms.mark(room) {
            let rooms = self.waiting_rooms.rooms();
            self.observer.waiting_rooms_changed(&rooms);
        }
    }

    fn on_draw(&mut self, event: &DrawEvent, now: Instant) {
        let local = self.identity.as_ref().map(|i| i.user_id.as_str());
        if self.replicator.inbound(event, self.rooms.selected(), local) != InboundVerdict::Deliver {
            return;
        }
        self.update_presence(now, |p, now| p.peer_seen(now));
        match event {
            DrawEvent::Stroke(e) => self.observer.stroke(e),
            DrawEvent::Clear(e) => self.observer.clear(e),
            DrawEvent::Emote(e) => self.observer.emote(e),
        }
    }

    fn on_transport_error(&mut self, message: &str, status_code: Option<u16>, now: Instant) {
        if status_code == Some(401) {
            self.expire(now);
            return;
        }
        let text = match status_code {
            Some(status) => format!("[WS {status}] {message}"),
            None => message.to_owned(),
        };
        warn!(status = ?status_code, %message, "server reported an error");

        if message.to_ascii_lowercase().contains(NOT_IN_ROOM) {
            self.update_presence(now, |p, now| p.peer_gone(now));
        } else if self.presence.state() == PresenceState::Joining {
            self.rooms.join_rejected();
            self.update_presence(now, |p, now| p.join_rejected(now));
        }
        self.notify(Notice::error(text));
    }

    /// An accepted chat request opens a room; join it and let the ack
    /// adopt it as the selection.
    fn join_accepted(&mut self, room: RoomKey) {
        if !self.online || (self.rooms.is_selected(&room) && self.presence.state().is_joined()) {
            return;
        }
        info!(%room, "chat request accepted; joining room");
        let join = self.rooms.join(room);
        self.manager.send(join.to_frame());
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn is_local_user(&self, user_id: &str) -> bool {
        self.identity.as_ref().is_some_and(|i| i.user_id == user_id)
    }

    fn set_online(&mut self, online: bool) {
        if self.online != online {
            self.online = online;
            self.observer.connection_changed(online);
        }
    }

    fn notify(&mut self, notice: Notice) {
        debug!(%notice, "notice");
        self.observer.notice(&notice);
    }

    fn update_presence(&mut self, now: Instant, f: impl FnOnce(&mut Presence, Instant) -> Option<PresenceState>) {
        let had_signal = self.presence.reconnect_available();
        if let Some(state) = f(&mut self.presence, now) {
            info!(
                state = state.as_str(),
                room = ?self.rooms.selected().map(RoomKey::as_str),
                "presence changed"
            );
            if !state.is_joined() {
                self.gesture.up();
            }
            self.observer.presence_changed(state);
        }
        if had_signal && !self.presence.reconnect_available() {
            self.observer.reconnect_available(false);
        }
    }
}

fn gate<'a>(identity: Option<&'a Identity>, rooms: &'a RoomJoin, online: bool, presence: &Presence) -> Gate<'a> {
    Gate {
        user_id: identity.map(|i| i.user_id.as_str()),
        room: rooms.selected(),
        online,
        presence: presence.state(),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
