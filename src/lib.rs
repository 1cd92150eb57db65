//! Drawback realtime session core.
//!
//! A signed-in user picks a room (an accepted chat request) and draws on a
//! shared canvas with exactly one peer. This crate owns the client side of
//! that: one authenticated socket per identity, the join/ack handshake,
//! peer presence, and the replication rules for strokes, clears and emotes.
//! Rendering is left to whatever implements [`session::SessionObserver`].

pub mod config;
pub mod driver;
pub mod net;
pub mod notice;
pub mod protocol;
pub mod session;
pub mod state;

pub use config::{ClientConfig, ConfigError};
pub use session::{Identity, Session, SessionObserver};
