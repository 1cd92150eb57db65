//! Client configuration parsed from environment variables.

use std::time::Duration;

use crate::net::backoff::{BackoffPolicy, DEFAULT_JITTER, DEFAULT_RECONNECT_DELAY, DEFAULT_RECONNECT_DELAY_MAX};
use crate::net::connection::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_PING_INTERVAL, Endpoint, LinkTimeouts,
};
use crate::state::presence::{DEFAULT_RECONNECT_COOLDOWN, DEFAULT_WAITING_GRACE, PresenceTimings};

pub const DEFAULT_TICK_MS: u64 = 250;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    MissingVar(&'static str),
    #[error("invalid backend endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("missing access token")]
    MissingCredential,
    #[error("access token cannot be sent in an Authorization header")]
    InvalidCredential,
    #[error("missing user id")]
    MissingUserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub backoff: BackoffPolicy,
    pub timeouts: LinkTimeouts,
    pub presence: PresenceTimings,
    /// Period of the session housekeeping tick.
    pub tick: Duration,
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `DRAWBACK_BACKEND_URL`: backend base URL, e.g. `https://host/api`
    ///
    /// Optional:
    /// - `DRAWBACK_ACCESS_TOKEN`, `DRAWBACK_USER_ID`: session identity
    /// - `DRAWBACK_RECONNECT_DELAY_MS`: default 1000
    /// - `DRAWBACK_RECONNECT_DELAY_MAX_MS`: default 5000
    /// - `DRAWBACK_RECONNECT_JITTER`: default 0.5
    /// - `DRAWBACK_CONNECT_TIMEOUT_MS`: default 20000
    /// - `DRAWBACK_PING_INTERVAL_MS`: default 25000
    /// - `DRAWBACK_IDLE_TIMEOUT_MS`: default 45000
    /// - `DRAWBACK_WAITING_GRACE_MS`: default 5000
    /// - `DRAWBACK_RECONNECT_COOLDOWN_MS`: default 3000
    /// - `DRAWBACK_TICK_MS`: default 250
    /// - `DRAWBACK_HTTP_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the backend URL is missing or unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let backend_url = non_blank("DRAWBACK_BACKEND_URL").ok_or(ConfigError::MissingVar("DRAWBACK_BACKEND_URL"))?;
        let endpoint = Endpoint::parse(&backend_url)?;

        let millis = |key: &str, default: Duration| {
            non_blank(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };

        let backoff = BackoffPolicy {
            initial: millis("DRAWBACK_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY),
            max: millis("DRAWBACK_RECONNECT_DELAY_MAX_MS", DEFAULT_RECONNECT_DELAY_MAX),
            jitter: non_blank("DRAWBACK_RECONNECT_JITTER")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|j| (0.0..=1.0).contains(j))
                .unwrap_or(DEFAULT_JITTER),
        };
        let floor = Duration::from_millis(10);
        let timeouts = LinkTimeouts {
            handshake: millis("DRAWBACK_CONNECT_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT).max(floor),
            ping_interval: millis("DRAWBACK_PING_INTERVAL_MS", DEFAULT_PING_INTERVAL).max(floor),
            idle: millis("DRAWBACK_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT).max(floor),
        };
        let presence = PresenceTimings {
            waiting_grace: millis("DRAWBACK_WAITING_GRACE_MS", DEFAULT_WAITING_GRACE),
            reconnect_cooldown: millis("DRAWBACK_RECONNECT_COOLDOWN_MS", DEFAULT_RECONNECT_COOLDOWN),
        };
        let tick = millis("DRAWBACK_TICK_MS", Duration::from_millis(DEFAULT_TICK_MS)).max(floor);
        let http_timeout = Duration::from_secs(
            non_blank("DRAWBACK_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );

        Ok(Self {
            endpoint,
            access_token: non_blank("DRAWBACK_ACCESS_TOKEN"),
            user_id: non_blank("DRAWBACK_USER_ID"),
            backoff,
            timeouts,
            presence,
            tick,
            http_timeout,
        })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
