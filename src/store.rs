//! Storage seam consumed by the core.
//!
//! The daemon does not own a persistence schema; it consumes these traits.
//! Lookups are synchronous — implementations own their concurrency. The
//! in-memory implementation here backs tests and standalone runs, and a
//! config-backed policy store serves as the fallback source when no scoped
//! storage is bound.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::policy::Policy;
use crate::policy::graph::{Activation, PolicyGraph};

/// Request to create an activation row for an `activate` edge.
#[derive(Debug, Clone)]
pub struct NewActivation {
    /// The edge being activated.
    pub edge_id: String,
    /// Bound process id for process-lifetime activations.
    pub process_id: Option<u32>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A caller profile, resolved from a broker token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Stable profile id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Profile kind (the token cache consumes `"target"` profiles).
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque broker token presented by callers.
    #[serde(default)]
    pub broker_token: Option<String>,
}

/// Read access to the policy set.
pub trait PolicyStore: Send + Sync {
    /// Enabled policies for a profile: the union of global and
    /// profile-scoped policies, in insertion order.
    fn get_enabled(&self, profile_id: Option<&str>) -> Result<Vec<Policy>>;
}

/// Read/write access to the policy graph and its activation log.
///
/// `activate` and `consume_activation` must be atomic with respect to the
/// dormant-active computation; the in-memory implementation serializes
/// writers behind a single mutex.
pub trait GraphStore: Send + Sync {
    /// Load the graph for a profile, if one is bound.
    fn load_graph(&self, profile_id: Option<&str>) -> Result<Option<PolicyGraph>>;
    /// Create an activation row.
    fn activate(&self, req: NewActivation) -> Result<Activation>;
    /// Live (non-consumed, non-expired) activations, optionally filtered to
    /// one edge.
    fn active_activations(&self, edge_id: Option<&str>) -> Result<Vec<Activation>>;
    /// Mark an activation consumed.
    fn consume_activation(&self, id: &str) -> Result<()>;
}

/// Read access to the secrets store.
pub trait SecretStore: Send + Sync {
    /// Look up a secret value by name.
    fn get_by_name(&self, name: &str) -> Result<Option<String>>;
}

/// Read access to caller profiles.
pub trait ProfileStore: Send + Sync {
    /// Profiles of the given kind.
    fn get_by_type(&self, kind: &str) -> Result<Vec<Profile>>;
}

/// In-memory store implementing every seam. Policy and graph snapshots are
/// swapped wholesale under a write lock so readers always observe a
/// consistent set.
#[derive(Default)]
pub struct MemoryStore {
    global_policies: RwLock<Vec<Policy>>,
    profile_policies: RwLock<HashMap<String, Vec<Policy>>>,
    graphs: RwLock<HashMap<Option<String>, PolicyGraph>>,
    activations: Mutex<Vec<Activation>>,
    secrets: RwLock<HashMap<String, String>>,
    profiles: RwLock<Vec<Profile>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the global policy set.
    pub fn set_policies(&self, policies: Vec<Policy>) {
        *self.global_policies.write() = policies;
    }

    /// Replace a profile's policy set.
    pub fn set_profile_policies(&self, profile_id: impl Into<String>, policies: Vec<Policy>) {
        self.profile_policies
            .write()
            .insert(profile_id.into(), policies);
    }

    /// Bind a graph globally (`None`) or to a profile.
    pub fn set_graph(&self, profile_id: Option<&str>, graph: PolicyGraph) {
        self.graphs
            .write()
            .insert(profile_id.map(String::from), graph);
    }

    /// Store a secret.
    pub fn put_secret(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.write().insert(name.into(), value.into());
    }

    /// Register a profile.
    pub fn put_profile(&self, profile: Profile) {
        self.profiles.write().push(profile);
    }
}

impl PolicyStore for MemoryStore {
    fn get_enabled(&self, profile_id: Option<&str>) -> Result<Vec<Policy>> {
        let mut out: Vec<Policy> = self
            .global_policies
            .read()
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        if let Some(id) = profile_id {
            if let Some(scoped) = self.profile_policies.read().get(id) {
                out.extend(scoped.iter().filter(|p| p.enabled).cloned());
            }
        }
        Ok(out)
    }
}

impl GraphStore for MemoryStore {
    fn load_graph(&self, profile_id: Option<&str>) -> Result<Option<PolicyGraph>> {
        let graphs = self.graphs.read();
        let scoped = graphs.get(&profile_id.map(String::from));
        Ok(scoped.or_else(|| graphs.get(&None)).cloned())
    }

    fn activate(&self, req: NewActivation) -> Result<Activation> {
        let activation = Activation {
            id: Uuid::new_v4().to_string(),
            edge_id: req.edge_id,
            activated_at: Utc::now(),
            process_id: req.process_id,
            expires_at: req.expires_at,
            consumed: false,
        };
        self.activations.lock().push(activation.clone());
        Ok(activation)
    }

    fn active_activations(&self, edge_id: Option<&str>) -> Result<Vec<Activation>> {
        let now = Utc::now();
        Ok(self
            .activations
            .lock()
            .iter()
            .filter(|a| a.is_live(now))
            .filter(|a| edge_id.is_none_or(|e| a.edge_id == e))
            .cloned()
            .collect())
    }

    fn consume_activation(&self, id: &str) -> Result<()> {
        let mut activations = self.activations.lock();
        if let Some(activation) = activations.iter_mut().find(|a| a.id == id) {
            activation.consumed = true;
        }
        Ok(())
    }
}

impl SecretStore for MemoryStore {
    fn get_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.read().get(name).cloned())
    }
}

impl ProfileStore for MemoryStore {
    fn get_by_type(&self, kind: &str) -> Result<Vec<Profile>> {
        Ok(self
            .profiles
            .read()
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect())
    }
}

/// Policy store backed by the daemon configuration, used when no scoped
/// storage is bound. Profile-blind: every profile sees the configured set.
pub struct ConfigPolicyStore {
    policies: Vec<Policy>,
}

impl ConfigPolicyStore {
    /// Wrap the configured policy list.
    #[must_use]
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }
}

impl PolicyStore for ConfigPolicyStore {
    fn get_enabled(&self, _profile_id: Option<&str>) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect())
    }
}
