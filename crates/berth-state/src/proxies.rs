//! Authoritative set of live proxies.

use std::collections::HashMap;

use async_trait::async_trait;
use berth_core::model::Proxy;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// CRUD over live proxy records, keyed by proxy id.
///
/// `add_proxy` is a unique insert: a second insert with the same id fails,
/// which is what makes retried starts idempotent at the store level. State
/// transitions for a single proxy id are single-writer; callers observe the
/// current version before writing a new one.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` when the id is taken.
    async fn add_proxy(&self, proxy: Proxy) -> StoreResult<()>;

    /// Replace the current version. Fails with `NotFound` when absent.
    async fn update_proxy(&self, proxy: Proxy) -> StoreResult<()>;

    /// Remove a record. Returns true when it existed.
    async fn remove_proxy(&self, id: &str) -> bool;

    async fn get_proxy(&self, id: &str) -> Option<Proxy>;

    async fn get_all_proxies(&self) -> Vec<Proxy>;
}

/// In-memory proxy store.
pub struct MemoryProxyStore {
    proxies: RwLock<HashMap<String, Proxy>>,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self {
            proxies: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProxyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn add_proxy(&self, proxy: Proxy) -> StoreResult<()> {
        let mut proxies = self.proxies.write().await;
        if proxies.contains_key(&proxy.id) {
            return Err(StoreError::Duplicate(proxy.id));
        }
        debug!(proxy_id = %proxy.id, "proxy stored");
        proxies.insert(proxy.id.clone(), proxy);
        Ok(())
    }

    async fn update_proxy(&self, proxy: Proxy) -> StoreResult<()> {
        let mut proxies = self.proxies.write().await;
        if !proxies.contains_key(&proxy.id) {
            return Err(StoreError::NotFound(proxy.id));
        }
        proxies.insert(proxy.id.clone(), proxy);
        Ok(())
    }

    async fn remove_proxy(&self, id: &str) -> bool {
        let existed = self.proxies.write().await.remove(id).is_some();
        debug!(proxy_id = %id, existed, "proxy removed");
        existed
    }

    async fn get_proxy(&self, id: &str) -> Option<Proxy> {
        self.proxies.read().await.get(id).cloned()
    }

    async fn get_all_proxies(&self) -> Vec<Proxy> {
        self.proxies.read().await.values().cloned().collect()
    }
}
