//! HTTP client for the clinic backend.
//!
//! [`ApiClient`] holds one pre-configured `reqwest::Client`, the base URL and
//! the bearer token of the signed-in patient.  Every request goes through
//! [`ApiClient::read`], which maps transport and status failures onto
//! [`ApiError`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ApiConfig, LoginSession};

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// HTTP transport or connection error.
    #[error("request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Missing or expired bearer token.
    #[error("not signed in or session expired")]
    Unauthorized,

    /// The response body was not the expected JSON.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The server answered `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Clinic backend client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    user_id: Option<String>,
}

impl ApiClient {
    /// Build a client from settings and the persisted login.
    ///
    /// The `Authorization: Bearer …` header is attached only when the login
    /// carries a non-blank token.
    pub fn from_config(config: &ApiConfig, login: &LoginSession) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: login.bearer().map(str::to_string),
            user_id: login.user_id.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Id of the signed-in patient, if known.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        log::debug!("api: GET {url}");
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::read(response).await
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        log::debug!("api: POST {url}");
        let response = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await?;
        Self::read(response).await
    }

    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        log::debug!("api: POST {url} (multipart)");
        let response = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
