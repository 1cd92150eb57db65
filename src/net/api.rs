//! Chat-request REST client and the pending-action guard around it.
//!
//! A room exists because a chat request was accepted, so the session core
//! consumes this API but never owns it. [`ChatRequests`] is the seam; the
//! HTTP implementation talks to `{api_base}/chat/requests*` with a bearer
//! credential.
//!
//! ERROR HANDLING
//! ==============
//! HTTP 401 maps to [`ApiError::Unauthorized`] so the host can expire the
//! session. Other non-success statuses carry the server's `message` when the
//! body has one, otherwise `Request failed: <status>`.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::{Credential, Endpoint};
use crate::protocol::RoomKey;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("action `{0}` is already in progress")]
    Busy(ActionKey),
}

impl ApiError {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default)]
    pub from_user: Option<UserSummary>,
    #[serde(default)]
    pub to_user: Option<UserSummary>,
    pub status: ChatRequestStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ChatRequest {
    /// The room this request opens once accepted.
    #[must_use]
    pub fn room_key(&self) -> Option<RoomKey> {
        if self.status == ChatRequestStatus::Accepted { RoomKey::parse(&self.id) } else { None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondOutcome {
    pub request: ChatRequest,
    #[serde(default)]
    pub room_id: Option<String>,
}

impl RespondOutcome {
    /// Room to join after responding. Falls back to the request id when the
    /// server does not name a room explicitly.
    #[must_use]
    pub fn room_key(&self) -> Option<RoomKey> {
        self.room_id
            .as_deref()
            .and_then(RoomKey::parse)
            .or_else(|| self.request.room_key())
    }
}

// =============================================================================
// API SEAM
// =============================================================================

#[async_trait]
pub trait ChatRequests: Send + Sync {
    async fn send(&self, to_display_name: &str) -> Result<ChatRequest, ApiError>;
    async fn respond(&self, request_id: &str, accept: bool) -> Result<RespondOutcome, ApiError>;
    async fn cancel(&self, request_id: &str) -> Result<(), ApiError>;
    async fn list_sent(&self) -> Result<Vec<ChatRequest>, ApiError>;
    async fn list_received(&self) -> Result<Vec<ChatRequest>, ApiError>;
}

/// [`ChatRequests`] over the backend's REST API.
#[derive(Clone)]
pub struct HttpChatRequests {
    client: reqwest::Client,
    api_base: String,
}

impl HttpChatRequests {
    /// Build a client that sends `credential` as a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or the HTTP client cannot be built.
    pub fn new(endpoint: &Endpoint, credential: &Credential, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&credential.bearer())?);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, api_base: endpoint.api_base().to_owned() })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, ApiError> {
        let url = format!("{}{path}", self.api_base);
        debug!(%method, %url, "chat api request");

        let request = self.client.request(method, &url);
        let request = if let Some(json) = body { request.json(&json) } else { request };
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = error_from_response(status.as_u16(), &text);
            warn!(status = status.as_u16(), error = %err, "chat api request failed");
            return Err(err);
        }
        Ok(Some(response.json::<T>().await?))
    }
}

#[async_trait]
impl ChatRequests for HttpChatRequests {
    async fn send(&self, to_display_name: &str) -> Result<ChatRequest, ApiError> {
        let body = serde_json::json!({ "toDisplayName": to_display_name });
        self.request(reqwest::Method::POST, "/chat/requests", Some(body))
            .await?
            .ok_or_else(|| empty_body(201))
    }

    async fn respond(&self, request_id: &str, accept: bool) -> Result<RespondOutcome, ApiError> {
        let body = serde_json::json!({ "accept": accept });
        self.request(reqwest::Method::POST, &request_path(request_id, "/respond"), Some(body))
            .await?
            .ok_or_else(|| empty_body(204))
    }

    async fn cancel(&self, request_id: &str) -> Result<(), ApiError> {
        self.request::<Value>(reqwest::Method::DELETE, &request_path(request_id, ""), None)
            .await
            .map(|_| ())
    }

    async fn list_sent(&self) -> Result<Vec<ChatRequest>, ApiError> {
        Ok(self
            .request(reqwest::Method::GET, "/chat/requests/sent", None)
            .await?
            .unwrap_or_default())
    }

    async fn list_received(&self) -> Result<Vec<ChatRequest>, ApiError> {
        Ok(self
            .request(reqwest::Method::GET, "/chat/requests/received", None)
            .await?
            .unwrap_or_default())
    }
}

fn request_path(request_id: &str, suffix: &str) -> String {
    let encoded: String = request_id
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                char::from(b).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    format!("/chat/requests/{encoded}{suffix}")
}

fn error_from_response(status: u16, body: &str) -> ApiError {
    if status == 401 {
        return ApiError::Unauthorized;
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Request failed: {status}"));
    ApiError::Status { status, message }
}

fn empty_body(status: u16) -> ApiError {
    ApiError::Status { status, message: "response body was empty".to_owned() }
}

// =============================================================================
// PENDING ACTIONS
// =============================================================================

/// Tag for one in-flight logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
    SendRequest(String),
    RequestStatus { request_id: String, accept: bool },
    CancelRequest(String),
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendRequest(name) => write!(f, "send-request:{}", name.trim().to_lowercase()),
            Self::RequestStatus { request_id, accept } => {
                let status = if *accept { "ACCEPTED" } else { "REJECTED" };
                write!(f, "request-status:{request_id}:{status}")
            }
            Self::CancelRequest(id) => write!(f, "cancel-request:{id}"),
        }
    }
}

/// Set of in-flight action keys. Clones share the set.
#[derive(Clone, Debug, Default)]
pub struct PendingActions {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Marks a key as pending until dropped.
#[derive(Debug)]
pub struct PendingGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

impl PendingActions {
    /// Claim `key`. Returns `None` while the same key is already pending.
    #[must_use]
    pub fn begin(&self, key: &ActionKey) -> Option<PendingGuard> {
        let key = key.to_string();
        let inserted = self.keys.lock().unwrap_or_else(PoisonError::into_inner).insert(key.clone());
        inserted.then(|| PendingGuard { keys: Arc::clone(&self.keys), key })
    }

    #[must_use]
    pub fn is_pending(&self, key: &ActionKey) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key.to_string())
    }

    /// Run `action` under `key`, refusing a duplicate submission.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Busy`] if `key` is already pending, otherwise
    /// whatever `action` returns.
    pub async fn run<T, F>(&self, key: ActionKey, action: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let Some(_guard) = self.begin(&key) else {
            debug!(%key, "duplicate action refused");
            return Err(ApiError::Busy(key));
        };
        action.await
    }
}

// =============================================================================
// CHAT ACTIONS
// =============================================================================

/// User-level chat-request operations, deduplicated by [`ActionKey`].
pub struct ChatActions<R> {
    api: R,
    pending: PendingActions,
}

impl<R: ChatRequests> ChatActions<R> {
    pub fn new(api: R) -> Self {
        Self { api, pending: PendingActions::default() }
    }

    #[must_use]
    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    #[must_use]
    pub fn api(&self) -> &R {
        &self.api
    }

    /// # Errors
    ///
    /// See [`PendingActions::run`].
    pub async fn send_request(&self, to_display_name: &str) -> Result<ChatRequest, ApiError> {
        let key = ActionKey::SendRequest(to_display_name.to_owned());
        self.pending.run(key, self.api.send(to_display_name.trim())).await
    }

    /// Accept or reject a received request. Accepting yields the room to join.
    ///
    /// # Errors
    ///
    /// See [`PendingActions::run`].
    pub async fn respond(&self, request_id: &str, accept: bool) -> Result<RespondOutcome, ApiError> {
        let key = ActionKey::RequestStatus { request_id: request_id.to_owned(), accept };
        self.pending.run(key, self.api.respond(request_id, accept)).await
    }

    /// # Errors
    ///
    /// See [`PendingActions::run`].
    pub async fn cancel(&self, request_id: &str) -> Result<(), ApiError> {
        let key = ActionKey::CancelRequest(request_id.to_owned());
        self.pending.run(key, self.api.cancel(request_id)).await
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
