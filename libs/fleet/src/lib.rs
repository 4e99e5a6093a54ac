//! # cover-fleet
//!
//! Fleet awareness for cover worker instances.
//!
//! The cover deployment runs as a fleet of identical stateless instances
//! behind a load balancer. Some periodic work must run on exactly one of
//! them at a time. This crate lets each instance decide, independently
//! and without coordination, whether it is that instance:
//!
//! - [`identity`]: the instance's deployment coordinates, resolved once
//!   at startup from platform-injected environment variables
//! - [`registry`]: one-shot queries against the platform's registry of
//!   currently-live instances
//! - [`credential`]: bearer tokens for the registry, via the platform's
//!   managed-identity endpoint
//! - [`oracle`]: the leadership decision: true iff the registry's first
//!   live instance is this one
//!
//! ## Design Principles
//!
//! - Leadership is re-derived from a fresh registry snapshot on every
//!   call; nothing is persisted or cached between decisions
//! - Uncertainty always resolves to "not leader": a skipped tick of
//!   singleton work is cheap, a duplicate run is not
//! - The registry's ordering is the single source of truth; no local
//!   tie-break is applied

pub mod credential;
pub mod identity;
pub mod oracle;
pub mod registry;

// Re-export commonly used types
pub use credential::{CredentialError, ManagedIdentityCredential, StaticCredential, TokenCredential};
pub use identity::{IdentityError, InstanceIdentity};
pub use oracle::LeadershipOracle;
pub use registry::{
    FleetRegistryClient, InstanceRecord, InstanceRegistry, RegistryError, RegistrySnapshot,
    StaticRegistry, DEFAULT_REGISTRY_URL,
};
