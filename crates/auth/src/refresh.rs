//! OAuth refresh-token grant and the credential holder that coalesces it.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use questline_core::config::AuthConfig;
use serde::Deserialize;

use crate::single_flight::SingleFlight;

/// Errors from a refresh attempt. Cloned verbatim to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error("token endpoint rejected refresh with status {status}")]
    Rejected { status: u16 },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("no refresh token configured")]
    NoRefreshToken,
}

/// Current access/refresh pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Performs the refresh-token grant against a token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl TokenRefresher {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
        })
    }

    /// Exchange `refresh_token` for fresh credentials.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials, RefreshError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": self.client_id,
        });

        let resp = self
            .client
            .post(&self.token_url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Token refresh failed");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let data: TokenRefreshResponse = resp
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if data.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty access_token".into()));
        }

        Ok(Credentials {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
        })
    }
}

/// Holds the current credentials. Concurrent refreshes collapse into one
/// request to the token endpoint.
#[derive(Clone)]
pub struct TokenSource {
    credentials: Arc<RwLock<Credentials>>,
    refresher: TokenRefresher,
    flight: SingleFlight<Credentials, RefreshError>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("token_url", &self.refresher.token_url)
            .field("refresh_in_flight", &self.flight.is_in_flight())
            .finish()
    }
}

impl TokenSource {
    pub fn new(credentials: Credentials, refresher: TokenRefresher) -> Self {
        Self {
            credentials: Arc::new(RwLock::new(credentials)),
            refresher,
            flight: SingleFlight::new(),
        }
    }

    /// Build from the `[auth]` section. `None` when no token endpoint is set.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>, RefreshError> {
        let Some(token_url) = config.token_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let refresher = TokenRefresher::new(
            token_url,
            config.client_id.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        let credentials = Credentials {
            access_token: config.access_token.clone().unwrap_or_default(),
            refresh_token: config.refresh_token.clone(),
        };
        Ok(Some(Self::new(credentials, refresher)))
    }

    /// The access token currently held.
    pub fn access_token(&self) -> String {
        self.read().access_token.clone()
    }

    /// Refresh the credentials, joining a refresh already in flight.
    pub async fn refresh(&self) -> Result<Credentials, RefreshError> {
        let credentials = Arc::clone(&self.credentials);
        let refresher = self.refresher.clone();

        self.flight
            .coordinate(move || async move {
                let refresh_token = read_lock(&credentials)
                    .refresh_token
                    .clone()
                    .ok_or(RefreshError::NoRefreshToken)?;

                let mut fresh = refresher.refresh(&refresh_token).await?;
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }

                *credentials.write().unwrap_or_else(|e| e.into_inner()) = fresh.clone();
                tracing::info!("Access token refreshed");
                Ok(fresh)
            })
            .await
    }

    /// Number of refresh requests actually sent (or attempted).
    pub fn refresh_count(&self) -> u64 {
        self.flight.invocations()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Credentials> {
        read_lock(&self.credentials)
    }
}

fn read_lock(lock: &RwLock<Credentials>) -> std::sync::RwLockReadGuard<'_, Credentials> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}
