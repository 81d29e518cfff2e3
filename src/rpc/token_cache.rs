//! Broker-token → profile-id resolution.
//!
//! The cache is rebuilt wholesale from storage on first access and thrown
//! away on any profile mutation; it is never patched incrementally, which
//! rules out partial-update races.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::Result;
use crate::store::ProfileStore;

/// O(1) broker-token lookup over target profiles.
pub struct TokenCache {
    profiles: Arc<dyn ProfileStore>,
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl TokenCache {
    /// Create an empty (cold) cache over a profile store.
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            profiles,
            cache: RwLock::new(None),
        }
    }

    /// Resolve a broker token to a profile id, building the cache on first
    /// access.
    pub fn resolve(&self, token: &str) -> Result<Option<String>> {
        if let Some(map) = self.cache.read().as_ref() {
            return Ok(map.get(token).cloned());
        }

        let map = self.rebuild()?;
        let resolved = map.get(token).cloned();
        *self.cache.write() = Some(map);
        Ok(resolved)
    }

    /// Drop the cache; the next resolve rebuilds it from storage. Call on
    /// any profile create/update/delete.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
        debug!("token cache invalidated");
    }

    fn rebuild(&self) -> Result<HashMap<String, String>> {
        let profiles = self.profiles.get_by_type("target")?;
        let map: HashMap<String, String> = profiles
            .into_iter()
            .filter_map(|p| p.broker_token.map(|token| (token, p.id)))
            .collect();
        debug!(entries = map.len(), "token cache rebuilt");
        Ok(map)
    }
}
