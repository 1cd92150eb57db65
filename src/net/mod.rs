//! Network layer: socket connection management and the chat-request API.

pub mod api;
pub mod backoff;
pub mod connection;
pub mod ws_link;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use connection::{Connection, ConnectionManager, Connector, Credential, Endpoint, Link, LinkEvent, LinkTarget, LinkTimeouts};
pub use ws_link::{WsConnector, WsLink};
