//! Pool-owned proxy records.
//!
//! Delegate proxies are owned exclusively by the scaler of their spec; no
//! user-facing endpoint ever refers to them directly.

use std::collections::HashMap;

use async_trait::async_trait;
use berth_core::model::DelegateProxy;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// CRUD over delegate proxies, keyed by the underlying proxy id.
#[async_trait]
pub trait DelegateProxyStore: Send + Sync {
    async fn add_delegate_proxy(&self, delegate: DelegateProxy) -> StoreResult<()>;

    async fn update_delegate_proxy(&self, delegate: DelegateProxy) -> StoreResult<()>;

    /// Returns true when the record existed.
    async fn remove_delegate_proxy(&self, proxy_id: &str) -> bool;

    async fn get_delegate_proxy(&self, proxy_id: &str) -> Option<DelegateProxy>;

    async fn get_all_delegate_proxies(&self) -> Vec<DelegateProxy>;
}

/// In-memory delegate proxy store.
pub struct MemoryDelegateProxyStore {
    delegates: RwLock<HashMap<String, DelegateProxy>>,
}

impl MemoryDelegateProxyStore {
    pub fn new() -> Self {
        Self {
            delegates: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDelegateProxyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DelegateProxyStore for MemoryDelegateProxyStore {
    async fn add_delegate_proxy(&self, delegate: DelegateProxy) -> StoreResult<()> {
        let mut delegates = self.delegates.write().await;
        if delegates.contains_key(&delegate.proxy.id) {
            return Err(StoreError::Duplicate(delegate.proxy.id));
        }
        delegates.insert(delegate.proxy.id.clone(), delegate);
        Ok(())
    }

    async fn update_delegate_proxy(&self, delegate: DelegateProxy) -> StoreResult<()> {
        let mut delegates = self.delegates.write().await;
        if !delegates.contains_key(&delegate.proxy.id) {
            return Err(StoreError::NotFound(delegate.proxy.id));
        }
        delegates.insert(delegate.proxy.id.clone(), delegate);
        Ok(())
    }

    async fn remove_delegate_proxy(&self, proxy_id: &str) -> bool {
        self.delegates.write().await.remove(proxy_id).is_some()
    }

    async fn get_delegate_proxy(&self, proxy_id: &str) -> Option<DelegateProxy> {
        self.delegates.read().await.get(proxy_id).cloned()
    }

    async fn get_all_delegate_proxies(&self) -> Vec<DelegateProxy> {
        self.delegates.read().await.values().cloned().collect()
    }
}
