//! The seam towards container drivers (Docker, Kubernetes, ...).
//!
//! The critical contract on `start_proxy`: it is all-or-nothing from the
//! caller's perspective. Either it returns a proxy whose containers carry
//! backend ids and targets, or it fails with `ProxyFailedToStart` carrying
//! whatever partial state must be cleaned up.

use async_trait::async_trait;

use crate::auth::Authentication;
use crate::error::CoreResult;
use crate::model::Proxy;
use crate::spec::ProxySpec;

/// Errors from a container backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The start failed after resources may have been allocated; `proxy`
    /// carries the partial state the caller must stop and remove.
    #[error("proxy failed to start: {reason}")]
    ProxyFailedToStart { proxy: Box<Proxy>, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Driver interface for starting and stopping container groups.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Start all containers of the proxy. On success the returned proxy's
    /// containers carry backend ids and targets.
    async fn start_proxy(
        &self,
        auth: Option<&Authentication>,
        proxy: Proxy,
        spec: &ProxySpec,
    ) -> BackendResult<Proxy>;

    async fn stop_proxy(&self, proxy: &Proxy) -> anyhow::Result<()>;

    async fn pause_proxy(&self, proxy: &Proxy) -> anyhow::Result<()>;

    /// Resume a paused proxy. Failure semantics match `start_proxy`.
    async fn resume_proxy(&self, proxy: Proxy, spec: &ProxySpec) -> BackendResult<Proxy>;

    /// Static capability flag; pause/resume are rejected up front when unset.
    fn supports_pause(&self) -> bool;

    /// Hook for backends that contribute runtime values referenced by spec
    /// expressions (e.g. assigned node names). Runs before resolution.
    async fn add_runtime_values_before_resolution(
        &self,
        _auth: Option<&Authentication>,
        _spec: &ProxySpec,
        proxy: Proxy,
    ) -> CoreResult<Proxy> {
        Ok(proxy)
    }
}
