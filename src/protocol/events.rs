//! Typed socket events and the schema decoder for inbound frames.
//!
//! ARCHITECTURE
//! ============
//! Every frame on the socket is routed by its dotted `event` name. Outbound
//! events are built from [`Outbound`] and never fail to encode. Inbound frames
//! pass through [`Inbound::decode`], which either yields one fully-typed
//! variant or a [`DecodeError`]; handlers never see raw JSON.
//!
//! Routing fields live on the envelope: `room_key` carries `roomKey` and
//! `from` carries the originating `userId` for drawing events. Everything
//! else is in `data`, camelCased.

use std::fmt;

use frames::Frame;
use serde_json::{Map, Value};
use tracing::debug;

use super::payload::{PayloadError, Stroke, check_emoji};

pub const ROOM_JOIN: &str = "room.join";
pub const ROOM_LEAVE: &str = "room.leave";
pub const ROOM_JOINED: &str = "room.joined";
pub const PEER_JOINED: &str = "peer.joined";
pub const PEER_LEFT: &str = "peer.left";
pub const PEER_WAITING: &str = "peer.waiting";
pub const DRAW_STROKE: &str = "draw.stroke";
pub const DRAW_CLEAR: &str = "draw.clear";
pub const DRAW_EMOTE: &str = "draw.emote";
pub const TRANSPORT_ERROR: &str = "transport.error";
pub const CONNECT_ERROR: &str = "connect.error";
pub const CHAT_REQUESTED: &str = "chat.requested";
pub const CHAT_RESPONSE: &str = "chat.response";

/// Error returned by [`Inbound::decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),
}

// =============================================================================
// ROOM KEY
// =============================================================================

/// Identifier of a two-party room: the accepted chat-request id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    /// Build a room key. Blank identifiers are not room keys.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() { None } else { Some(Self(raw.to_owned())) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct StrokeEvent {
    pub room_key: RoomKey,
    pub stroke: Stroke,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearEvent {
    pub room_key: RoomKey,
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmoteEvent {
    pub room_key: RoomKey,
    pub emoji: String,
    pub user_id: String,
}

/// A drawing event of any kind, as seen by the replicator.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawEvent {
    Stroke(StrokeEvent),
    Clear(ClearEvent),
    Emote(EmoteEvent),
}

impl DrawEvent {
    #[must_use]
    pub fn room_key(&self) -> &RoomKey {
        match self {
            Self::Stroke(e) => &e.room_key,
            Self::Clear(e) => &e.room_key,
            Self::Emote(e) => &e.room_key,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::Stroke(e) => &e.user_id,
            Self::Clear(e) => &e.user_id,
            Self::Emote(e) => &e.user_id,
        }
    }
}

/// Events this core sends.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Join { room_key: RoomKey },
    Leave,
    Draw(DrawEvent),
}

/// Events this core receives.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    RoomJoined { room_key: RoomKey, peer_ids: Vec<String> },
    PeerJoined { user_id: String },
    PeerLeft { user_id: String },
    PeerWaiting { room_key: RoomKey, user_id: String },
    Draw(DrawEvent),
    TransportError { message: String, status_code: Option<u16> },
    ConnectError { reason: String },
    ChatRequested { request_id: String, from_user_id: String, from_display_name: String, message: String },
    ChatResponse { request_id: String, accepted: bool, room_key: Option<RoomKey> },
}

// =============================================================================
// ENCODE
// =============================================================================

impl Outbound {
    /// Event name on the wire.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::Join { .. } => ROOM_JOIN,
            Self::Leave => ROOM_LEAVE,
            Self::Draw(DrawEvent::Stroke(_)) => DRAW_STROKE,
            Self::Draw(DrawEvent::Clear(_)) => DRAW_CLEAR,
            Self::Draw(DrawEvent::Emote(_)) => DRAW_EMOTE,
        }
    }

    /// Build the wire frame for this event.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut data = Map::new();
        match self {
            Self::Join { room_key } => {
                data.insert("roomKey".into(), Value::String(room_key.to_string()));
                Frame::new(self.event(), Value::Object(data)).with_room_key(room_key.as_str())
            }
            Self::Leave => Frame::new(self.event(), Value::Object(data)),
            Self::Draw(event) => {
                match event {
                    DrawEvent::Stroke(e) => e.stroke.write_payload(&mut data),
                    DrawEvent::Clear(_) => {}
                    DrawEvent::Emote(e) => {
                        data.insert("emoji".into(), Value::String(e.emoji.clone()));
                    }
                }
                Frame::new(self.event(), Value::Object(data))
                    .with_room_key(event.room_key().as_str())
                    .with_from(event.user_id())
            }
        }
    }
}

// =============================================================================
// DECODE
// =============================================================================

impl Inbound {
    /// Decode one inbound frame against the schema for its event name.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for unknown events and for payloads that do not
    /// match their schema.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let data = &frame.data;
        match frame.event.as_str() {
            ROOM_JOINED => Ok(Self::RoomJoined {
                room_key: frame_room(frame)?,
                peer_ids: string_list(data, "peerIds")?,
            }),
            PEER_JOINED => Ok(Self::PeerJoined { user_id: required_str(data, "userId")? }),
            PEER_LEFT => Ok(Self::PeerLeft { user_id: required_str(data, "userId")? }),
            PEER_WAITING => Ok(Self::PeerWaiting {
                room_key: frame_room(frame)?,
                user_id: required_str(data, "userId")?,
            }),
            DRAW_STROKE => Ok(Self::Draw(DrawEvent::Stroke(StrokeEvent {
                room_key: frame_room(frame)?,
                stroke: Stroke::from_payload(data)?,
                user_id: frame_user(frame)?,
            }))),
            DRAW_CLEAR => Ok(Self::Draw(DrawEvent::Clear(ClearEvent {
                room_key: frame_room(frame)?,
                user_id: frame_user(frame)?,
            }))),
            DRAW_EMOTE => {
                let emoji = required_str(data, "emoji")?;
                Ok(Self::Draw(DrawEvent::Emote(EmoteEvent {
                    room_key: frame_room(frame)?,
                    emoji: check_emoji(&emoji)?,
                    user_id: frame_user(frame)?,
                })))
            }
            TRANSPORT_ERROR => Ok(Self::TransportError {
                message: optional_str(data, "message")
                    .unwrap_or_else(|| "request failed".to_owned()),
                status_code: status_code(data),
            }),
            CONNECT_ERROR => Ok(Self::ConnectError {
                reason: optional_str(data, "reason").unwrap_or_else(|| "unknown".to_owned()),
            }),
            CHAT_REQUESTED => {
                let from_user = data.get("fromUser").ok_or(DecodeError::MissingField("fromUser"))?;
                Ok(Self::ChatRequested {
                    request_id: required_str(data, "requestId")?,
                    from_user_id: required_str(from_user, "id")?,
                    from_display_name: required_str(from_user, "displayName")?,
                    message: optional_str(data, "message").unwrap_or_default(),
                })
            }
            CHAT_RESPONSE => Ok(Self::ChatResponse {
                request_id: required_str(data, "requestId")?,
                accepted: data
                    .get("accepted")
                    .and_then(Value::as_bool)
                    .ok_or(DecodeError::MissingField("accepted"))?,
                room_key: data
                    .get("roomId")
                    .and_then(Value::as_str)
                    .and_then(RoomKey::parse)
                    .or_else(|| frame.room_key.as_deref().and_then(RoomKey::parse))
                    .or_else(|| data.get("requestId").and_then(Value::as_str).and_then(RoomKey::parse)),
            }),
            other => Err(DecodeError::UnknownEvent(other.to_owned())),
        }
    }
}

fn frame_room(frame: &Frame) -> Result<RoomKey, DecodeError> {
    frame
        .room_key
        .as_deref()
        .and_then(RoomKey::parse)
        .ok_or(DecodeError::MissingField("roomKey"))
}

fn frame_user(frame: &Frame) -> Result<String, DecodeError> {
    frame
        .from
        .as_deref()
        .map(str::trim)
        .filter(|from| !from.is_empty())
        .map(str::to_owned)
        .ok_or(DecodeError::MissingField("userId"))
}

fn required_str(data: &Value, key: &'static str) -> Result<String, DecodeError> {
    match data.get(key) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(DecodeError::MissingField(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::InvalidField {
            field: key,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn optional_str(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .filter(|s| !s.trim().is_empty())
}

fn string_list(data: &Value, key: &'static str) -> Result<Vec<String>, DecodeError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| DecodeError::InvalidField {
                    field: key,
                    reason: format!("expected string entries, got {item}"),
                })
            })
            .collect(),
        Some(other) => Err(DecodeError::InvalidField {
            field: key,
            reason: format!("expected array, got {other}"),
        }),
    }
}

/// Status codes travel as JSON numbers and come back as floats after the
/// protobuf round trip. Anything that is not an HTTP status is dropped so
/// the error message still reaches the user.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn status_code(data: &Value) -> Option<u16> {
    let raw = data.get("statusCode").filter(|v| !v.is_null())?;
    let status = raw
        .as_f64()
        .filter(|n| n.fract() == 0.0 && (100.0..=599.0).contains(n));
    if status.is_none() {
        debug!(status = %raw, "ignoring malformed transport error status");
    }
    status.map(|n| n as u16)
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
