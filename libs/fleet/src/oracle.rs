//! Leadership oracle.
//!
//! Every instance answers "am I the leader?" from scratch on each call:
//! one registry query, then compare the first live instance against our
//! own id. There is no local state and no retry: a failed or stale read
//! simply means "not leader" for that tick. During registry
//! inconsistency windows more than one instance may transiently decide it
//! is leader; singleton tasks must tolerate rare at-least-once execution.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::identity::InstanceIdentity;
use crate::registry::InstanceRegistry;

/// Decides whether this instance is the fleet leader.
pub struct LeadershipOracle {
    identity: Option<InstanceIdentity>,
    registry: Arc<dyn InstanceRegistry>,
}

impl LeadershipOracle {
    /// `identity` is `None` when startup resolution failed; such a
    /// process can never become leader.
    pub fn new(identity: Option<InstanceIdentity>, registry: Arc<dyn InstanceRegistry>) -> Self {
        Self { identity, registry }
    }

    /// Decide leadership from a fresh registry snapshot.
    ///
    /// Never fails: an unresolved identity, a registry error, and an
    /// empty snapshot all yield `false`. Two calls may legitimately
    /// disagree as the fleet scales.
    pub async fn is_leader(&self) -> bool {
        let Some(identity) = &self.identity else {
            debug!("Deployment identity unresolved; not leader");
            return false;
        };

        let snapshot = match self.registry.list_instances(identity).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Fleet registry unavailable; assuming not leader");
                return false;
            }
        };

        let Some(leader) = snapshot.first() else {
            debug!("Fleet registry reported no live instances; not leader");
            return false;
        };

        let is_leader = leader.name == identity.instance_id;
        debug!(
            instance_id = %identity.instance_id,
            leader = %leader.name,
            fleet_size = snapshot.len(),
            is_leader,
            "Leadership decision"
        );
        is_leader
    }
}
