//! Route registry consumed by the request-proxying layer.
//!
//! Routes are keyed by target name, not by proxy id; the same target name
//! must never be live for two proxies at once. A duplicate insert is
//! programmer error and is rejected rather than silently overwritten.

use std::collections::HashMap;

use berth_core::error::CoreError;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::LifecycleResult;

#[derive(Debug, Clone)]
struct Mapping {
    proxy_id: String,
    uri: String,
}

/// Registry of live reverse-proxy routes.
pub struct MappingManager {
    mappings: RwLock<HashMap<String, Mapping>>,
}

impl MappingManager {
    pub fn new() -> Self {
        Self {
            mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Register a route. Fails when the target name is already live.
    pub async fn add_mapping(
        &self,
        proxy_id: &str,
        target_name: &str,
        uri: &str,
    ) -> LifecycleResult<()> {
        let mut mappings = self.mappings.write().await;
        if let Some(existing) = mappings.get(target_name) {
            return Err(CoreError::IllegalState(format!(
                "target '{target_name}' is already mapped for proxy {}",
                existing.proxy_id
            ))
            .into());
        }
        debug!(%proxy_id, %target_name, %uri, "route registered");
        mappings.insert(
            target_name.to_string(),
            Mapping {
                proxy_id: proxy_id.to_string(),
                uri: uri.to_string(),
            },
        );
        Ok(())
    }

    /// Unregister a route. Returns the URI it pointed at, if it was live.
    pub async fn remove_mapping(&self, target_name: &str) -> Option<String> {
        let removed = self.mappings.write().await.remove(target_name);
        if removed.is_some() {
            debug!(%target_name, "route unregistered");
        }
        removed.map(|m| m.uri)
    }

    pub async fn get_mapping(&self, target_name: &str) -> Option<String> {
        self.mappings.read().await.get(target_name).map(|m| m.uri.clone())
    }

    /// All live target names of a proxy.
    pub async fn targets_of(&self, proxy_id: &str) -> Vec<String> {
        self.mappings
            .read()
            .await
            .iter()
            .filter(|(_, m)| m.proxy_id == proxy_id)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for MappingManager {
    fn default() -> Self {
        Self::new()
    }
}
