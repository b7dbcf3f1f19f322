//! The per-proxy state machine.
//!
//! Every operation splits in two: a synchronous phase that validates access,
//! reserves the record and applies the store-visible transition, and a
//! deferred [`Command`] holding the long-running half (backend calls and
//! readiness probes). Callers schedule the command themselves; the split is
//! load-bearing — it lets the HTTP layer answer 202 before the container is
//! ready, and lets the pool scaler race a ready seat against a pending build.
//!
//! Failure paths during a start converge on the same rollback: stop whatever
//! the backend may have allocated (best-effort), remove the record, publish
//! one `ProxyStartFailed` event, and fail the command.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

use berth_core::auth::Authentication;
use berth_core::backend::{BackendError, ContainerBackend};
use berth_core::error::CoreError;
use berth_core::event::{EventBus, ProxyEvent};
use berth_core::expression::{SpecExpressionContext, SpecResolver};
use berth_core::model::{now_millis, Proxy, ProxyStartupLog, ProxyStatus};
use berth_core::probe::TestStrategy;
use berth_core::provider::SpecProvider;
use berth_core::spec::ProxySpec;
use berth_state::ProxyStore;

use crate::access::AccessControl;
use crate::error::{LifecycleError, LifecycleResult};
use crate::mapping::MappingManager;
use crate::runtime_values::RuntimeValueService;

type CommandFuture = Pin<Box<dyn Future<Output = LifecycleResult<Proxy>> + Send>>;

/// A deferred lifecycle operation.
///
/// Running it drives the proxy through its long phase and resolves to the
/// final record (or the failure). Dropping a command without running it
/// leaves the proxy in its intermediate status.
pub struct Command {
    proxy_id: String,
    future: CommandFuture,
}

impl Command {
    fn new(proxy_id: impl Into<String>, future: CommandFuture) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            future,
        }
    }

    pub fn proxy_id(&self) -> &str {
        &self.proxy_id
    }

    pub async fn run(self) -> LifecycleResult<Proxy> {
        self.future.await
    }

    /// Run on the runtime's worker pool, reporting the outcome through a
    /// completion channel.
    pub fn spawn(self) -> oneshot::Receiver<LifecycleResult<Proxy>> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(self.future.await);
        });
        rx
    }
}

/// Entry point for working with proxies.
#[derive(Clone)]
pub struct ProxyService {
    proxy_store: Arc<dyn ProxyStore>,
    spec_provider: Arc<dyn SpecProvider>,
    backend: Arc<dyn ContainerBackend>,
    mapping_manager: Arc<MappingManager>,
    event_bus: EventBus,
    runtime_values: Arc<RuntimeValueService>,
    resolver: Arc<SpecResolver>,
    test_strategy: Arc<dyn TestStrategy>,
    access_control: Arc<AccessControl>,
    stop_proxies_on_shutdown: bool,
}

impl ProxyService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proxy_store: Arc<dyn ProxyStore>,
        spec_provider: Arc<dyn SpecProvider>,
        backend: Arc<dyn ContainerBackend>,
        mapping_manager: Arc<MappingManager>,
        event_bus: EventBus,
        runtime_values: Arc<RuntimeValueService>,
        resolver: Arc<SpecResolver>,
        test_strategy: Arc<dyn TestStrategy>,
        access_control: Arc<AccessControl>,
        stop_proxies_on_shutdown: bool,
    ) -> Self {
        Self {
            proxy_store,
            spec_provider,
            backend,
            mapping_manager,
            event_bus,
            runtime_values,
            resolver,
            test_strategy,
            access_control,
            stop_proxies_on_shutdown,
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_spec(&self, id: &str) -> Option<ProxySpec> {
        if id.is_empty() {
            return None;
        }
        self.spec_provider.get_spec(id)
    }

    /// All registered specs the caller may use.
    pub fn find_specs(&self, auth: Option<&Authentication>, ignore_access: bool) -> Vec<ProxySpec> {
        self.spec_provider
            .get_specs()
            .into_iter()
            .filter(|spec| ignore_access || self.access_control.can_access(auth, Some(spec)))
            .collect()
    }

    /// Lookup by id, without an access check.
    pub async fn get_proxy(&self, id: &str) -> Option<Proxy> {
        self.proxy_store.get_proxy(id).await
    }

    /// All proxies visible to the caller: admins see everything, other
    /// users only what they own.
    pub async fn get_proxies(&self, auth: Option<&Authentication>, ignore_access: bool) -> Vec<Proxy> {
        let is_admin = auth.map(|a| a.admin).unwrap_or(false);
        let mut matches = Vec::new();
        for proxy in self.proxy_store.get_all_proxies().await {
            if ignore_access || is_admin || is_owner(auth, &proxy) {
                matches.push(proxy);
            }
        }
        matches
    }

    pub async fn get_proxies_of_user(&self, user_id: &str) -> Vec<Proxy> {
        self.proxy_store
            .get_all_proxies()
            .await
            .into_iter()
            .filter(|p| p.user_id.as_deref() == Some(user_id))
            .collect()
    }

    // ── Start ──────────────────────────────────────────────────────

    /// Reserve and validate a new proxy, returning the command that boots it.
    ///
    /// The proxy id is caller-supplied so retries stay idempotent: a second
    /// reservation under the same id fails at the store.
    pub async fn start_proxy(
        &self,
        auth: &Authentication,
        spec: &ProxySpec,
        runtime_values: Option<Vec<berth_core::runtime_values::RuntimeValue>>,
        proxy_id: impl Into<String>,
        parameters: Option<&HashMap<String, String>>,
    ) -> LifecycleResult<Command> {
        if !self.access_control.can_access(Some(auth), Some(spec)) {
            return Err(CoreError::AccessDenied(format!(
                "cannot start proxy of spec {}",
                spec.id
            ))
            .into());
        }

        let proxy_id = proxy_id.into();
        let mut proxy = Proxy::new(proxy_id.clone(), spec.id.clone(), Some(auth.name.clone()));
        proxy.display_name = spec.effective_display_name().to_string();
        if let Some(values) = runtime_values {
            for value in values {
                proxy.add_runtime_value(value);
            }
        }
        let proxy = self
            .runtime_values
            .process_parameters(Some(auth), spec, parameters, proxy)?;

        self.proxy_store.add_proxy(proxy.clone()).await?;

        let service = self.clone();
        let auth = auth.clone();
        let spec = spec.clone();
        Ok(Command::new(
            proxy_id,
            Box::pin(async move { service.run_start(auth, spec, proxy).await }),
        ))
    }

    /// Start with a fresh id and wait for the proxy to come up.
    pub async fn start_and_wait(
        &self,
        auth: &Authentication,
        spec: &ProxySpec,
    ) -> LifecycleResult<Proxy> {
        let id = Uuid::new_v4().to_string();
        self.start_proxy(auth, spec, None, id, None).await?.run().await
    }

    async fn run_start(
        &self,
        auth: Authentication,
        spec: ProxySpec,
        proxy: Proxy,
    ) -> LifecycleResult<Proxy> {
        let mut startup_log = ProxyStartupLog::new();

        let (resolved_spec, proxy) = self
            .prepare_proxy_for_start(Some(&auth), proxy, spec)
            .await?;

        let fallback = proxy.clone();
        let mut proxy = match self
            .backend
            .start_proxy(Some(&auth), proxy, &resolved_spec)
            .await
        {
            Ok(proxy) => proxy,
            Err(BackendError::ProxyFailedToStart { proxy, reason }) => {
                self.rollback_failed_start(&proxy, true).await;
                return Err(CoreError::ContainerStartFailed(reason).into());
            }
            Err(BackendError::Other(e)) => {
                self.rollback_failed_start(&fallback, false).await;
                return Err(CoreError::ContainerStartFailed(e.to_string()).into());
            }
        };
        startup_log.container_started();
        proxy.refresh_targets();

        if !self.test_strategy.test_proxy(&proxy).await {
            self.rollback_failed_start(&proxy, true).await;
            return Err(CoreError::NotResponding.into());
        }
        startup_log.application_ready();

        proxy.startup_timestamp = now_millis();
        proxy.status = ProxyStatus::Up;

        if let Err(e) = self.setup_proxy(&proxy).await {
            self.rollback_failed_start(&proxy, true).await;
            return Err(e);
        }
        self.proxy_store.update_proxy(proxy.clone()).await?;

        info!(
            user_id = proxy.user_id.as_deref().unwrap_or("-"),
            spec_id = %resolved_spec.id,
            proxy_id = %proxy.id,
            "proxy activated"
        );
        self.event_bus.publish(ProxyEvent::ProxyStarted {
            proxy_id: proxy.id.clone(),
            user_id: proxy.user_id.clone(),
            spec_id: proxy.spec_id.clone(),
            startup_log,
        });
        Ok(proxy)
    }

    // ── Stop ───────────────────────────────────────────────────────

    /// Transition to `Stopping`, drop the routes, and return the teardown
    /// command. Routes disappear synchronously so no new request races the
    /// teardown.
    pub async fn stop_proxy(
        &self,
        auth: Option<&Authentication>,
        proxy: Proxy,
        ignore_access: bool,
    ) -> LifecycleResult<Command> {
        self.check_mutation_access(auth, &proxy, ignore_access, "stop")?;
        if !proxy.status.can_transition_to(ProxyStatus::Stopping) {
            return Err(CoreError::IllegalState(format!(
                "cannot stop proxy {} in status {}",
                proxy.id,
                proxy.status.as_str()
            ))
            .into());
        }

        let stopping = proxy.with_status(ProxyStatus::Stopping);
        self.proxy_store.update_proxy(stopping.clone()).await?;
        self.remove_routes(&proxy).await;

        let service = self.clone();
        Ok(Command::new(
            proxy.id.clone(),
            Box::pin(async move { service.run_stop(stopping).await }),
        ))
    }

    async fn run_stop(&self, proxy: Proxy) -> LifecycleResult<Proxy> {
        let stopped = proxy.with_status(ProxyStatus::Stopped);
        match self.backend.stop_proxy(&proxy).await {
            Ok(()) => {
                if let Err(e) = self.proxy_store.update_proxy(stopped.clone()).await {
                    warn!(proxy_id = %proxy.id, error = %e, "failed to record stopped status");
                }
                info!(
                    user_id = proxy.user_id.as_deref().unwrap_or("-"),
                    spec_id = %proxy.spec_id,
                    proxy_id = %proxy.id,
                    "proxy released"
                );
                self.event_bus.publish(ProxyEvent::ProxyStopped {
                    proxy_id: proxy.id.clone(),
                    user_id: proxy.user_id.clone(),
                    spec_id: proxy.spec_id.clone(),
                    usage: proxy.usage_duration(),
                });
            }
            Err(e) => {
                // The record is removed regardless; the in-memory view must
                // converge even when the cluster is unreachable.
                error!(proxy_id = %proxy.id, error = %e, "failed to release proxy");
            }
        }
        self.proxy_store.remove_proxy(&proxy.id).await;
        Ok(stopped)
    }

    // ── Pause / resume ─────────────────────────────────────────────

    pub async fn pause_proxy(
        &self,
        auth: Option<&Authentication>,
        proxy: Proxy,
        ignore_access: bool,
    ) -> LifecycleResult<Command> {
        self.check_mutation_access(auth, &proxy, ignore_access, "pause")?;
        if !self.backend.supports_pause() {
            return Err(
                CoreError::NotSupported("backend does not support pausing proxies".into()).into(),
            );
        }
        if !proxy.status.can_transition_to(ProxyStatus::Pausing) {
            return Err(CoreError::IllegalState(format!(
                "cannot pause proxy {} in status {}",
                proxy.id,
                proxy.status.as_str()
            ))
            .into());
        }

        let pausing = proxy.with_status(ProxyStatus::Pausing);
        self.proxy_store.update_proxy(pausing.clone()).await?;
        self.remove_routes(&proxy).await;

        let service = self.clone();
        Ok(Command::new(
            proxy.id.clone(),
            Box::pin(async move { service.run_pause(pausing).await }),
        ))
    }

    async fn run_pause(&self, proxy: Proxy) -> LifecycleResult<Proxy> {
        if let Err(e) = self.backend.pause_proxy(&proxy).await {
            error!(proxy_id = %proxy.id, error = %e, "failed to pause proxy");
            return Err(LifecycleError::Backend(e.to_string()));
        }
        let paused = proxy.with_status(ProxyStatus::Paused);
        self.proxy_store.update_proxy(paused.clone()).await?;
        info!(
            user_id = proxy.user_id.as_deref().unwrap_or("-"),
            spec_id = %proxy.spec_id,
            proxy_id = %proxy.id,
            "proxy paused"
        );
        self.event_bus.publish(ProxyEvent::ProxyPaused {
            proxy_id: proxy.id.clone(),
            user_id: proxy.user_id.clone(),
            spec_id: proxy.spec_id.clone(),
        });
        Ok(paused)
    }

    /// Resume a paused proxy. Parameters may change across a pause, and the
    /// environment is re-evaluated against the current runtime context, so
    /// expressions pick up fresh values (e.g. newly issued user tokens).
    pub async fn resume_proxy(
        &self,
        auth: &Authentication,
        proxy: Proxy,
        parameters: Option<&HashMap<String, String>>,
        ignore_access: bool,
    ) -> LifecycleResult<Command> {
        self.check_mutation_access(Some(auth), &proxy, ignore_access, "resume")?;
        if !self.backend.supports_pause() {
            return Err(
                CoreError::NotSupported("backend does not support pausing proxies".into()).into(),
            );
        }
        if !proxy.status.can_transition_to(ProxyStatus::Resuming) {
            return Err(CoreError::IllegalState(format!(
                "cannot resume proxy {} in status {}",
                proxy.id,
                proxy.status.as_str()
            ))
            .into());
        }
        let spec = self
            .get_spec(&proxy.spec_id)
            .ok_or_else(|| CoreError::NotFound(format!("spec {}", proxy.spec_id)))?;

        let resuming = proxy.with_status(ProxyStatus::Resuming);
        let parameterized = self
            .runtime_values
            .process_parameters(Some(auth), &spec, parameters, resuming)?;
        self.proxy_store.update_proxy(parameterized.clone()).await?;

        let service = self.clone();
        let auth = auth.clone();
        Ok(Command::new(
            proxy.id.clone(),
            Box::pin(async move { service.run_resume(auth, parameterized).await }),
        ))
    }

    async fn run_resume(&self, auth: Authentication, proxy: Proxy) -> LifecycleResult<Proxy> {
        // Fetch the latest spec version so re-resolution sees current state.
        let spec = self
            .get_spec(&proxy.spec_id)
            .ok_or_else(|| CoreError::NotFound(format!("spec {}", proxy.spec_id)))?;
        let (resolved_spec, proxy) = self.prepare_proxy_for_start(Some(&auth), proxy, spec).await?;

        let fallback = proxy.clone();
        let mut proxy = match self.backend.resume_proxy(proxy, &resolved_spec).await {
            Ok(proxy) => proxy,
            Err(BackendError::ProxyFailedToStart { proxy, reason }) => {
                self.rollback_failed_start(&proxy, true).await;
                return Err(CoreError::ContainerStartFailed(reason).into());
            }
            Err(BackendError::Other(e)) => {
                self.rollback_failed_start(&fallback, false).await;
                return Err(CoreError::ContainerStartFailed(e.to_string()).into());
            }
        };
        proxy.refresh_targets();

        if !self.test_strategy.test_proxy(&proxy).await {
            self.rollback_failed_start(&proxy, true).await;
            return Err(CoreError::NotResponding.into());
        }

        proxy.status = ProxyStatus::Up;
        if let Err(e) = self.setup_proxy(&proxy).await {
            self.rollback_failed_start(&proxy, true).await;
            return Err(e);
        }
        self.proxy_store.update_proxy(proxy.clone()).await?;

        info!(
            user_id = proxy.user_id.as_deref().unwrap_or("-"),
            spec_id = %proxy.spec_id,
            proxy_id = %proxy.id,
            "proxy resumed"
        );
        self.event_bus.publish(ProxyEvent::ProxyResumed {
            proxy_id: proxy.id.clone(),
            user_id: proxy.user_id.clone(),
            spec_id: proxy.spec_id.clone(),
        });
        Ok(proxy)
    }

    // ── Recovery / shutdown ────────────────────────────────────────

    /// Insert a proxy already observed in the backend and register its
    /// routes. Used by recovery only; publishes no start event.
    pub async fn add_existing_proxy(&self, proxy: Proxy) -> LifecycleResult<()> {
        self.proxy_store.add_proxy(proxy.clone()).await?;
        self.setup_proxy(&proxy).await?;
        info!(
            user_id = proxy.user_id.as_deref().unwrap_or("-"),
            spec_id = %proxy.spec_id,
            proxy_id = %proxy.id,
            "existing proxy re-activated"
        );
        Ok(())
    }

    /// Best-effort stop of every live proxy, honoring
    /// `stop_proxies_on_shutdown`. When disabled, containers are left to the
    /// backend, permitting hot restarts.
    pub async fn shutdown(&self) {
        if !self.stop_proxies_on_shutdown {
            return;
        }
        for proxy in self.proxy_store.get_all_proxies().await {
            if let Err(e) = self.backend.stop_proxy(&proxy).await {
                error!(proxy_id = %proxy.id, error = %e, "failed to stop proxy on shutdown");
            }
        }
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Runtime values, expression resolution, runtime values again — with
    /// the full start rollback on any failure (the proxy may already own a
    /// container when called from resume).
    pub async fn prepare_proxy_for_start(
        &self,
        auth: Option<&Authentication>,
        proxy: Proxy,
        spec: ProxySpec,
    ) -> LifecycleResult<(ProxySpec, Proxy)> {
        let snapshot = proxy.clone();
        match self.try_prepare(auth, proxy, &spec).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.rollback_failed_start(&snapshot, true).await;
                Err(CoreError::ContainerStartFailed(e.to_string()).into())
            }
        }
    }

    async fn try_prepare(
        &self,
        auth: Option<&Authentication>,
        proxy: Proxy,
        spec: &ProxySpec,
    ) -> LifecycleResult<(ProxySpec, Proxy)> {
        let proxy = self
            .runtime_values
            .add_runtime_values_before_resolution(auth, spec, proxy);
        let proxy = self
            .backend
            .add_runtime_values_before_resolution(auth, spec, proxy)
            .await?;

        let context = SpecExpressionContext::create(Some(&proxy), Some(spec), auth)?;
        let resolved = spec.resolve(&self.resolver, &context)?;

        let proxy = self
            .runtime_values
            .add_runtime_values_after_resolution(&resolved, proxy);
        Ok((resolved, proxy))
    }

    /// Shared failure path: stop (optional, best-effort), remove, publish.
    async fn rollback_failed_start(&self, proxy: &Proxy, stop_container: bool) {
        if stop_container {
            if let Err(e) = self.backend.stop_proxy(proxy).await {
                warn!(proxy_id = %proxy.id, error = %e, "error while stopping failed proxy");
            }
        }
        self.proxy_store.remove_proxy(&proxy.id).await;
        self.event_bus.publish(ProxyEvent::ProxyStartFailed {
            proxy_id: Some(proxy.id.clone()),
            user_id: proxy.user_id.clone(),
            spec_id: proxy.spec_id.clone(),
        });
    }

    /// Register every container target with the mapping manager.
    async fn setup_proxy(&self, proxy: &Proxy) -> LifecycleResult<()> {
        for container in &proxy.containers {
            for (name, uri) in &container.targets {
                self.mapping_manager.add_mapping(&proxy.id, name, uri).await?;
            }
        }
        Ok(())
    }

    async fn remove_routes(&self, proxy: &Proxy) {
        for name in proxy.targets.keys() {
            self.mapping_manager.remove_mapping(name).await;
        }
    }

    fn check_mutation_access(
        &self,
        auth: Option<&Authentication>,
        proxy: &Proxy,
        ignore_access: bool,
        operation: &str,
    ) -> LifecycleResult<()> {
        let allowed = ignore_access
            || auth
                .map(|a| a.admin || is_owner(Some(a), proxy))
                .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(CoreError::AccessDenied(format!("cannot {operation} proxy {}", proxy.id)).into())
        }
    }
}

fn is_owner(auth: Option<&Authentication>, proxy: &Proxy) -> bool {
    match auth {
        Some(auth) => proxy.user_id.as_deref() == Some(auth.name.as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership() {
        let alice = Authentication::user("alice");
        let bob = Authentication::user("bob");
        let proxy = Proxy::new("p-1", "spec-a", Some("alice".to_string()));

        assert!(is_owner(Some(&alice), &proxy));
        assert!(!is_owner(Some(&bob), &proxy));
        assert!(!is_owner(None, &proxy));

        let delegate = Proxy::new("d-1", "spec-a", None);
        assert!(!is_owner(Some(&alice), &delegate));
    }
}
