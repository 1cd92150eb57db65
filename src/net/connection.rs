//! Transport connection manager.
//!
//! ARCHITECTURE
//! ============
//! A [`Connection`] is one socket link bound to one credential and endpoint.
//! The manager owns at most one of them. `acquire` is idempotent for an
//! unchanged credential: it hands back the live connection (asking the link
//! to reconnect if it is down) instead of opening a second socket. A new
//! credential tears the old connection down first, dropping its listener
//! channel so events from the old link can no longer be delivered.
//!
//! The socket itself lives behind the [`Connector`] / [`Link`] seam so the
//! session can be driven by an in-memory link in tests and by the
//! `tokio-tungstenite` link in production.

use std::fmt;
use std::time::Duration;

use frames::Frame;
use reqwest::Url;
use reqwest::header::HeaderValue;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backoff::BackoffPolicy;
use crate::config::ConfigError;

/// Socket path, relative to the endpoint origin.
pub const SOCKET_PATH: &str = "/drawback";

// =============================================================================
// CREDENTIAL
// =============================================================================

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Validate a raw token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] for a blank token and
    /// [`ConfigError::InvalidCredential`] when the token cannot be carried in
    /// an `Authorization` header.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        if HeaderValue::from_str(&format!("Bearer {raw}")).is_err() {
            return Err(ConfigError::InvalidCredential);
        }
        Ok(Self(raw.to_owned()))
    }

    /// The raw token, for building request headers.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// =============================================================================
// ENDPOINT
// =============================================================================

/// Backend location: the REST base as configured and the socket URL derived
/// from its origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    api_base: String,
    socket_url: Url,
}

impl Endpoint {
    /// Parse a backend URL such as `https://host/api`.
    ///
    /// Only the origin is used for the socket; the path is kept for REST.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] for unparseable URLs,
    /// unsupported schemes, and URLs without a host.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint(format!("{raw}: {reason}"));
        let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        let (http_scheme, ws_scheme) = match url.scheme() {
            "http" | "ws" => ("http", "ws"),
            "https" | "wss" => ("https", "wss"),
            other => return Err(invalid(&format!("unsupported scheme `{other}`"))),
        };
        let Some(host) = url.host_str() else {
            return Err(invalid("missing host"));
        };
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let socket_url = Url::parse(&format!("{ws_scheme}://{authority}{SOCKET_PATH}"))
            .map_err(|e| invalid(&e.to_string()))?;
        let api_base = format!("{http_scheme}://{authority}{}", url.path().trim_end_matches('/'));

        Ok(Self { api_base, socket_url })
    }

    /// REST base URL without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[must_use]
    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }
}

// =============================================================================
// LINK SEAM
// =============================================================================

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Liveness limits for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Upper bound on one connect attempt, TCP and upgrade included.
    pub handshake: Duration,
    /// Period of outbound pings while connected.
    pub ping_interval: Duration,
    /// A connected socket with no inbound traffic for this long is dropped.
    pub idle: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            handshake: DEFAULT_HANDSHAKE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            idle: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Everything a link needs to connect.
#[derive(Clone, Debug)]
pub struct LinkTarget {
    pub endpoint: Endpoint,
    pub credential: Credential,
    pub backoff: BackoffPolicy,
    pub timeouts: LinkTimeouts,
}

/// Lifecycle and traffic reported by a link to its listener.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: String },
    ConnectFailed { reason: String },
    /// The handshake was refused with HTTP 401. The link has stopped.
    Unauthorized,
    Frame(Frame),
}

/// One live socket, owned by a [`Connection`].
pub trait Link {
    /// Submit a frame. Returns `false` when the link is down and the frame
    /// was dropped.
    fn send(&self, frame: Frame) -> bool;
    fn is_connected(&self) -> bool;
    /// Skip any pending backoff and try to connect now.
    fn reconnect(&self);
    /// Stop the link for good.
    fn close(&self);
}

/// Factory for links.
pub trait Connector {
    type Link: Link;

    /// Start a link that reports to `listener` for its whole lifetime.
    fn open(&self, target: &LinkTarget, listener: mpsc::UnboundedSender<LinkEvent>) -> Self::Link;
}

// =============================================================================
// CONNECTION MANAGER
// =============================================================================

/// A link plus the listener channel attached to it.
pub struct Connection<L> {
    id: u64,
    endpoint: Endpoint,
    credential: Credential,
    link: L,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl<L: Link> Connection<L> {
    /// Identity of this connection within its manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    backoff: BackoffPolicy,
    timeouts: LinkTimeouts,
    current: Option<Connection<C::Link>>,
    opened: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, backoff: BackoffPolicy, timeouts: LinkTimeouts) -> Self {
        Self { connector, backoff, timeouts, current: None, opened: 0 }
    }

    /// Return the connection for `credential`, opening one if needed.
    ///
    /// An existing connection with the same credential and endpoint is
    /// reused; if its link is down a reconnect is requested. Any other
    /// existing connection is released first.
    pub fn acquire(&mut self, endpoint: &Endpoint, credential: &Credential) -> &Connection<C::Link> {
        let connection = match self.current.take() {
            Some(existing) if &existing.credential == credential && &existing.endpoint == endpoint => {
                if !existing.link.is_connected() {
                    debug!(connection_id = existing.id, "reusing disconnected link; requesting reconnect");
                    existing.link.reconnect();
                }
                existing
            }
            existing => {
                if let Some(old) = existing {
                    Self::close(old);
                }
                self.open(endpoint, credential)
            }
        };
        self.current.insert(connection)
    }

    fn open(&mut self, endpoint: &Endpoint, credential: &Credential) -> Connection<C::Link> {
        let (tx, rx) = mpsc::unbounded_channel();
        let target = LinkTarget {
            endpoint: endpoint.clone(),
            credential: credential.clone(),
            backoff: self.backoff,
            timeouts: self.timeouts,
        };
        self.opened += 1;
        let link = self.connector.open(&target, tx);
        info!(connection_id = self.opened, url = %endpoint.socket_url(), "opened realtime connection");
        Connection {
            id: self.opened,
            endpoint: endpoint.clone(),
            credential: credential.clone(),
            link,
            events: Some(rx),
        }
    }

    fn close(connection: Connection<C::Link>) {
        connection.link.close();
        info!(connection_id = connection.id, "released realtime connection");
    }

    /// Close the current connection, if any, and detach its listener.
    pub fn release(&mut self) {
        if let Some(connection) = self.current.take() {
            Self::close(connection);
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Connection<C::Link>> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.link.is_connected())
    }

    /// Submit a frame on the current link.
    pub fn send(&self, frame: Frame) -> bool {
        self.current.as_ref().is_some_and(|c| c.link.send(frame))
    }

    /// Ask a disconnected link to retry now. Returns whether a retry was
    /// requested.
    pub fn reconnect_if_down(&self) -> bool {
        match &self.current {
            Some(c) if !c.link.is_connected() => {
                c.link.reconnect();
                true
            }
            _ => false,
        }
    }

    /// Non-blocking poll of the listener channel.
    pub fn try_next_event(&mut self) -> Option<LinkEvent> {
        self.current.as_mut()?.events.as_mut()?.try_recv().ok()
    }

    /// Wait for the next event from the current link.
    ///
    /// Pends forever while there is no connection or once the link has
    /// stopped, so it can sit in a `select!` next to other sources.
    pub async fn next_event(&mut self) -> LinkEvent {
        if let Some(events) = self.current.as_mut().and_then(|c| c.events.as_mut()) {
            if let Some(event) = events.recv().await {
                return event;
            }
        }
        if let Some(connection) = self.current.as_mut() {
            connection.events = None;
        }
        std::future::pending().await
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
