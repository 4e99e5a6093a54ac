//! Fleet registry client.
//!
//! The registry is the platform's management API: it reports the ordered
//! list of currently-live instances for a deployment. The ordering is
//! registry-defined and authoritative; this module never reorders or
//! second-guesses it. One query per call with no snapshot caching;
//! retry policy belongs to the caller, never to this client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::credential::{CredentialError, TokenCredential};
use crate::identity::InstanceIdentity;

/// Default registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://management.azure.com";

/// API version sent with every instance listing.
const API_VERSION: &str = "2024-04-01";

/// Resource audience for registry bearer tokens.
const TOKEN_RESOURCE: &str = "https://management.azure.com/";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry errors.
///
/// All of these mean the same thing to a leadership decision ("not
/// leader for this tick") but they are distinct for observability.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The query did not complete within the client timeout.
    #[error("registry query timed out")]
    Timeout(#[source] reqwest::Error),

    /// Connection-level failure.
    #[error("registry transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The registry rejected our credentials.
    #[error("registry denied the query: HTTP {status}")]
    Denied { status: u16 },

    /// Any other non-success response.
    #[error("registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("malformed registry response: {0}")]
    Malformed(#[source] reqwest::Error),

    /// Token acquisition failed before the query was sent.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// One live instance as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceRecord {
    /// Platform-assigned instance identifier.
    pub name: String,
}

/// Ordered list of live instances from a single registry query.
///
/// The first record is the fleet leader. Snapshots are constructed per
/// query and discarded after use, never cached across ticks.
pub type RegistrySnapshot = Vec<InstanceRecord>;

/// Source of registry snapshots.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// List the currently-live instances for the given deployment.
    ///
    /// Performs exactly one external query. An empty snapshot is a valid
    /// result, distinct from a failed query.
    async fn list_instances(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<RegistrySnapshot, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct InstanceListResponse {
    #[serde(default)]
    value: Vec<InstanceRecord>,
}

/// HTTP client for the platform's fleet registry.
pub struct FleetRegistryClient {
    client: reqwest::Client,
    base_url: String,
    credential: Option<Arc<dyn TokenCredential>>,
}

impl FleetRegistryClient {
    /// Create a client with the default query timeout.
    pub fn new(
        base_url: impl Into<String>,
        credential: Option<Arc<dyn TokenCredential>>,
    ) -> Self {
        Self::with_timeout(base_url, credential, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit query timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        credential: Option<Arc<dyn TokenCredential>>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    fn instances_url(&self, identity: &InstanceIdentity) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}/instances?api-version={}",
            self.base_url,
            identity.subscription_id,
            identity.resource_group,
            identity.site_name,
            API_VERSION,
        )
    }
}

#[async_trait]
impl InstanceRegistry for FleetRegistryClient {
    async fn list_instances(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<RegistrySnapshot, RegistryError> {
        let url = self.instances_url(identity);
        debug!(url = %url, "Querying fleet registry");

        let mut request = self.client.get(&url);
        if let Some(credential) = &self.credential {
            let token = credential.token(TOKEN_RESOURCE).await?;
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout(e)
            } else {
                RegistryError::Transport(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RegistryError::Denied {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: InstanceListResponse = response.json().await.map_err(RegistryError::Malformed)?;
        debug!(instance_count = body.value.len(), "Fleet registry query complete");
        Ok(body.value)
    }
}

/// Fixed or scripted registry for tests and local development.
///
/// Serves queued snapshots in order and keeps repeating the last one once
/// the queue is down to a single entry. `unavailable()` fails every query
/// the way a downed registry would.
pub struct StaticRegistry {
    snapshots: Mutex<VecDeque<RegistrySnapshot>>,
    unavailable: bool,
    calls: AtomicU64,
}

impl StaticRegistry {
    /// Registry that always reports the given instances, in order.
    pub fn with_instances(names: &[&str]) -> Self {
        let snapshot = names
            .iter()
            .map(|name| InstanceRecord {
                name: name.to_string(),
            })
            .collect();
        Self::with_snapshots(vec![snapshot])
    }

    /// Registry that serves the given snapshots one query at a time.
    pub fn with_snapshots(snapshots: Vec<RegistrySnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            unavailable: false,
            calls: AtomicU64::new(0),
        }
    }

    /// Registry that fails every query.
    pub fn unavailable() -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            unavailable: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of queries served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceRegistry for StaticRegistry {
    async fn list_instances(
        &self,
        _identity: &InstanceIdentity,
    ) -> Result<RegistrySnapshot, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable {
            return Err(RegistryError::Status {
                status: 503,
                body: "static registry configured as unavailable".to_string(),
            });
        }

        let mut snapshots = self.snapshots.lock().expect("snapshot queue lock poisoned");
        let snapshot = if snapshots.len() > 1 {
            snapshots.pop_front().unwrap_or_default()
        } else {
            snapshots.front().cloned().unwrap_or_default()
        };
        Ok(snapshot)
    }
}
