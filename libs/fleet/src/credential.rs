//! Bearer-token credentials for the fleet registry.
//!
//! In the cloud the platform injects a local managed-identity endpoint
//! into every instance; registry tokens are fetched from it. Tokens are
//! cached until shortly before expiry. Registry snapshots themselves are
//! never cached, only the credential used to read them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Platform variable holding the managed-identity endpoint URL.
pub const IDENTITY_ENDPOINT_VAR: &str = "IDENTITY_ENDPOINT";

/// Platform variable holding the secret header for the endpoint.
pub const IDENTITY_HEADER_VAR: &str = "IDENTITY_HEADER";

const TOKEN_API_VERSION: &str = "2019-08-01";

/// Refresh tokens this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 120;

/// Credential errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Transport failure talking to the token endpoint.
    #[error("token endpoint transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Token endpoint rejected the request.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Token response could not be decoded.
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Source of bearer tokens for a resource audience.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Return a token currently valid for the given resource.
    async fn token(&self, resource: &str) -> Result<String, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix timestamp in seconds, sent as a string by the endpoint.
    expires_on: String,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Credential backed by the platform's managed-identity endpoint.
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    endpoint: String,
    header: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ManagedIdentityCredential {
    /// Build from the platform-injected endpoint variables.
    ///
    /// Returns `None` outside the cloud, where the endpoint is absent.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var(IDENTITY_ENDPOINT_VAR)
            .ok()
            .filter(|v| !v.is_empty())?;
        let header = std::env::var(IDENTITY_HEADER_VAR)
            .ok()
            .filter(|v| !v.is_empty())?;
        Some(Self::new(endpoint, header))
    }

    /// Build against an explicit endpoint.
    pub fn new(endpoint: impl Into<String>, header: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint: endpoint.into(),
            header: header.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch_token(&self, resource: &str) -> Result<CachedToken, CredentialError> {
        debug!(resource = %resource, "Fetching registry token");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("resource", resource), ("api-version", TOKEN_API_VERSION)])
            .header("X-IDENTITY-HEADER", &self.header)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        let expires_on: i64 = body
            .expires_on
            .parse()
            .map_err(|_| CredentialError::Malformed(format!("bad expires_on: {}", body.expires_on)))?;
        let expires_at = DateTime::<Utc>::from_timestamp(expires_on, 0)
            .ok_or_else(|| CredentialError::Malformed(format!("expires_on out of range: {expires_on}")))?;

        Ok(CachedToken {
            token: body.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn token(&self, resource: &str) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.is_fresh(Utc::now()) {
                return Ok(entry.token.clone());
            }
        }

        let fresh = self.fetch_token(resource).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Fixed-token credential for tests and local development.
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn token(&self, _resource: &str) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }
}
