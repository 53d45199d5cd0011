//! Platform credential session.
//!
//! One `Session` per platform endpoint, shared by reference (`Arc<Session>`)
//! with every component that talks to the platform API. The access token is
//! fetched lazily, cached, and refreshed once when a request comes back 401.

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Login failed with status {status}: {body}")]
    Login { status: StatusCode, body: String },

    #[error("Login response carried no access token")]
    MissingToken,

    #[error("Request still unauthorized after re-login")]
    Unauthorized,
}

/// Platform endpoint and login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Platform base URL, e.g. `http://10.0.0.2:8080`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Path of the login endpoint
    pub login_path: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            login_path: "/v1/auth/login".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Authenticated access to the platform API.
pub struct Session {
    config: PlatformConfig,
    client: Client,
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new(config: PlatformConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// `<base_url><path>`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cached token, logging in first if there is none.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        let cached = self.token.read().clone();
        if let Some(token) = cached {
            return Ok(token);
        }
        let token = self.login().await?;
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token; the next call logs in again.
    pub fn invalidate(&self) {
        if self.token.write().take().is_some() {
            debug!("Access token for {} invalidated", self.base_url());
        }
    }

    async fn login(&self) -> Result<String, SessionError> {
        let url = self.url(&self.config.login_path);
        info!("Logging in to {} as {}", self.base_url(), self.config.username);

        let resp = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Login { status, body });
        }

        let body: serde_json::Value = resp.json().await?;
        extract_token(&body).ok_or(SessionError::MissingToken)
    }

    /// Send an authenticated request built by `build`.
    ///
    /// On 401 the token is invalidated, refreshed once, and the request sent
    /// again. `build` may therefore be called twice.
    pub async fn send<F>(&self, build: F) -> Result<Response, SessionError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let resp = build(&self.client).bearer_auth(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!("Token rejected by {}, logging in again", self.base_url());
        self.invalidate();
        let token = self.access_token().await?;
        let resp = build(&self.client).bearer_auth(&token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(SessionError::Unauthorized);
        }
        Ok(resp)
    }
}

/// Token from a login response: either top-level or wrapped in `data`.
fn extract_token(body: &serde_json::Value) -> Option<String> {
    body.get("access_token")
        .or_else(|| body.get("data").and_then(|d| d.get("access_token")))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
