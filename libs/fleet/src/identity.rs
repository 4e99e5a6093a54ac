//! Deployment identity for a single fleet instance.
//!
//! The hosting platform injects the instance's coordinates into the
//! process environment. Identity is resolved once at startup and held for
//! the process lifetime; it never changes while a process runs. An
//! instance that cannot resolve a complete identity can never become
//! leader (fail-safe, not fatal).

use thiserror::Error;

/// Platform variable holding `{subscription_id}+{hosting_plan}`.
pub const OWNER_NAME_VAR: &str = "WEBSITE_OWNER_NAME";

/// Platform variable holding the resource group name.
pub const RESOURCE_GROUP_VAR: &str = "WEBSITE_RESOURCE_GROUP";

/// Platform variable holding the site (deployment) name.
pub const SITE_NAME_VAR: &str = "WEBSITE_SITE_NAME";

/// Platform variable holding this instance's identifier.
pub const INSTANCE_ID_VAR: &str = "WEBSITE_INSTANCE_ID";

/// Identity resolution errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A required platform variable is missing or empty.
    ///
    /// This is permanent for the process lifetime: identity is resolved
    /// once and never retried.
    #[error("deployment identity incomplete: {missing} is not set")]
    Incomplete { missing: &'static str },
}

/// Coordinates of one running instance within its deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    /// Subscription owning the deployment.
    pub subscription_id: String,

    /// Resource group containing the site.
    pub resource_group: String,

    /// Site (deployment) name.
    pub site_name: String,

    /// Platform-assigned identifier of this instance.
    pub instance_id: String,
}

impl InstanceIdentity {
    /// Resolve identity from the process environment.
    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve identity through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IdentityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let owner_name = required(&lookup, OWNER_NAME_VAR)?;
        let resource_group = required(&lookup, RESOURCE_GROUP_VAR)?;
        let site_name = required(&lookup, SITE_NAME_VAR)?;
        let instance_id = required(&lookup, INSTANCE_ID_VAR)?;

        // The owner name is "{subscription_id}+{hosting_plan}".
        let subscription_id = match owner_name.split_once('+') {
            Some((subscription, _)) => subscription.to_string(),
            None => owner_name.clone(),
        };
        if subscription_id.is_empty() {
            return Err(IdentityError::Incomplete {
                missing: OWNER_NAME_VAR,
            });
        }

        Ok(Self {
            subscription_id,
            resource_group,
            site_name,
            instance_id,
        })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, IdentityError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(IdentityError::Incomplete { missing: name }),
    }
}
