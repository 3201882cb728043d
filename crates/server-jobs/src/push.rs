// crates/server-jobs/src/push.rs
//! Delivery of completed sessions to the system of record.

use std::time::Duration;

use async_trait::async_trait;
use questline_auth::{RefreshError, TokenSource};
use questline_core::config::SyncConfig;
use questline_core::SyncPayload;
use reqwest::StatusCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PushError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("system of record rejected push with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("system of record refused credentials")]
    Unauthorized,

    #[error("credential refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

impl PushError {
    /// Whether the same push may succeed if attempted again shortly.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Transport(_) => true,
            PushError::Rejected { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            PushError::Unauthorized | PushError::Refresh(_) => false,
        }
    }
}

/// Sends one session to the system of record. `Ok` means acknowledged.
#[async_trait]
pub trait SyncPush: Send + Sync {
    async fn push(&self, payload: &SyncPayload) -> Result<(), PushError>;
}

#[derive(Debug, Clone)]
enum Bearer {
    None,
    Static(String),
    Refreshable(TokenSource),
}

/// JSON-over-HTTP push.
///
/// The session id doubles as the `Idempotency-Key`, so a push repeated after
/// a lost acknowledgement is recognised by the receiver.
#[derive(Debug, Clone)]
pub struct HttpSyncPush {
    client: reqwest::Client,
    endpoint: String,
    bearer: Bearer,
}

impl HttpSyncPush {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bearer: Bearer::None,
        })
    }

    /// Build from `[sync]`, preferring a refreshable token source when one
    /// is configured. `None` when sync is disabled.
    pub fn from_config(
        config: &SyncConfig,
        tokens: Option<TokenSource>,
    ) -> Result<Option<Self>, PushError> {
        let Some(endpoint) = config.endpoint.as_deref().filter(|_| config.enabled()) else {
            return Ok(None);
        };
        let push = Self::new(endpoint, config.timeout())?;
        Ok(Some(match (tokens, config.api_token.clone()) {
            (Some(tokens), _) => push.with_token_source(tokens),
            (None, Some(token)) => push.with_static_token(token),
            (None, None) => push,
        }))
    }

    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.bearer = Bearer::Static(token.into());
        self
    }

    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.bearer = Bearer::Refreshable(tokens);
        self
    }

    fn current_token(&self) -> Option<String> {
        match &self.bearer {
            Bearer::None => None,
            Bearer::Static(token) => Some(token.clone()),
            Bearer::Refreshable(tokens) => Some(tokens.access_token()),
        }
    }

    async fn send(&self, payload: &SyncPayload, token: Option<&str>) -> Result<(), PushError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", &payload.session_id)
            .json(payload);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(PushError::Unauthorized);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PushError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SyncPush for HttpSyncPush {
    async fn push(&self, payload: &SyncPayload) -> Result<(), PushError> {
        let token = self.current_token();
        match self.send(payload, token.as_deref()).await {
            Err(PushError::Unauthorized) => {
                let Bearer::Refreshable(tokens) = &self.bearer else {
                    return Err(PushError::Unauthorized);
                };
                tracing::info!(session_id = %payload.session_id, "Push unauthorized, refreshing credentials");
                let fresh = tokens.refresh().await?;
                self.send(payload, Some(&fresh.access_token)).await
            }
            other => other,
        }
    }
}
