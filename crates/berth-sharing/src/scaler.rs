//! Per-spec pool reconciler.
//!
//! One scaler instance runs per spec with a sharing extension. A single
//! worker task drains an unbounded signal channel; signals are enqueued on a
//! periodic tick, on `PendingProxy` (a user is waiting) and on `SeatClaimed`
//! (a seat just left the pool). Every drain iteration first checks
//! leadership, so across the cluster at most one scaler mutates the pool of
//! a given spec at a time.
//!
//! The reconcile arithmetic compares two populations against the pool:
//!
//! ```text
//! gap = unclaimed + builds_in_flight - minimum_seats - waiting_claimants
//! ```
//!
//! A negative gap launches that many build jobs on the worker pool; each job
//! reserves its id in `pending_delegates` before it is spawned, so the next
//! reconcile already sees it. A gap above `maximum_seats_available` walks
//! delegates whose seats are all unclaimed and retires them, one atomic
//! `remove_seats` at a time.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use berth_core::backend::{BackendError, ContainerBackend};
use berth_core::config::{public_path_prefix, BerthConfig};
use berth_core::event::{EventBus, ProxyEvent};
use berth_core::expression::{SpecExpressionContext, SpecResolver};
use berth_core::leader::LeaderService;
use berth_core::model::{now_millis, Container, DelegateProxy, Proxy, ProxyStatus, Seat};
use berth_core::probe::TestStrategy;
use berth_core::runtime_values::{self, RuntimeValue};
use berth_core::spec::{ProxySharingSpec, ProxySpec};
use berth_lifecycle::RuntimeValueService;
use berth_state::{DelegateProxyStore, SeatStore};

use crate::error::{SharingError, SharingResult};

enum Signal {
    Reconcile,
}

/// Leader-gated reconciler for one spec's seat pool.
pub struct ProxySharingScaler {
    inner: Arc<Inner>,
    worker: JoinHandle<()>,
    ticker: JoinHandle<()>,
    listener: JoinHandle<()>,
}

struct Inner {
    spec: ProxySpec,
    sharing: ProxySharingSpec,
    leader: Arc<dyn LeaderService>,
    seat_store: Arc<dyn SeatStore>,
    delegate_store: Arc<dyn DelegateProxyStore>,
    backend: Arc<dyn ContainerBackend>,
    resolver: Arc<SpecResolver>,
    runtime_values: Arc<RuntimeValueService>,
    test_strategy: Arc<dyn TestStrategy>,
    tx: mpsc::UnboundedSender<Signal>,
    /// Build jobs in flight, by reserved delegate id. Appended before the
    /// job is spawned, cleared when it finishes either way.
    pending_delegates: Mutex<Vec<String>>,
    /// Proxies of users waiting for a seat, by proxy id. Appended by the
    /// event listener, drained one entry per successful claim.
    pending_delegating: Mutex<Vec<String>>,
}

impl ProxySharingScaler {
    /// Start the reconciler for a spec. Fails when the spec carries no
    /// sharing extension.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        spec: ProxySpec,
        leader: Arc<dyn LeaderService>,
        seat_store: Arc<dyn SeatStore>,
        delegate_store: Arc<dyn DelegateProxyStore>,
        backend: Arc<dyn ContainerBackend>,
        resolver: Arc<SpecResolver>,
        runtime_values: Arc<RuntimeValueService>,
        test_strategy: Arc<dyn TestStrategy>,
        event_bus: &EventBus,
        config: &BerthConfig,
        shutdown: watch::Receiver<bool>,
    ) -> SharingResult<Self> {
        let sharing = spec
            .sharing
            .clone()
            .ok_or_else(|| SharingError::NotShared(spec.id.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            spec,
            sharing,
            leader,
            seat_store,
            delegate_store,
            backend,
            resolver,
            runtime_values,
            test_strategy,
            tx,
            pending_delegates: Mutex::new(Vec::new()),
            pending_delegating: Mutex::new(Vec::new()),
        });

        let worker = tokio::spawn(run_worker(inner.clone(), rx, shutdown.clone()));
        let ticker = tokio::spawn(run_ticker(
            inner.clone(),
            config.reconcile_interval(),
            shutdown.clone(),
        ));
        let listener = tokio::spawn(run_listener(inner.clone(), event_bus.subscribe(), shutdown));

        info!(
            spec_id = %inner.spec.id,
            minimum = inner.sharing.minimum_seats_available,
            maximum = inner.sharing.maximum_seats_available,
            "proxy sharing scaler started"
        );
        Ok(Self {
            inner,
            worker,
            ticker,
            listener,
        })
    }

    /// Enqueue a reconcile signal out of band.
    pub fn trigger_reconcile(&self) {
        let _ = self.inner.tx.send(Signal::Reconcile);
    }

    /// Build jobs currently in flight.
    pub fn pending_build_count(&self) -> usize {
        self.inner.pending_delegates.lock().expect("lock").len()
    }

    /// Users currently waiting for a seat.
    pub fn pending_claimant_count(&self) -> usize {
        self.inner.pending_delegating.lock().expect("lock").len()
    }

    /// Stop all background tasks without draining the pool.
    pub fn stop(&self) {
        self.worker.abort();
        self.ticker.abort();
        self.listener.abort();
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<Signal>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Reconcile) => {
                    // Non-leaders discard the signal and keep draining; a
                    // later leadership change picks the loop back up.
                    if !inner.leader.is_leader() {
                        debug!(spec_id = %inner.spec.id, "not the leader, skipping reconcile");
                        continue;
                    }
                    reconcile(&inner).await;
                }
                None => break,
            },
            _ = shutdown.changed() => {
                info!(spec_id = %inner.spec.id, "scaler worker shutting down");
                break;
            }
        }
    }
}

async fn run_ticker(
    inner: Arc<Inner>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner.leader.is_leader() {
                    let _ = inner.tx.send(Signal::Reconcile);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_listener(
    inner: Arc<Inner>,
    mut events: tokio::sync::broadcast::Receiver<berth_core::event::EventEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(envelope) => inner.on_event(&envelope.event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    // Dropped notifications are only lost wake-ups; the
                    // periodic tick reconciles anyway.
                    warn!(spec_id = %inner.spec.id, missed, "scaler lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

impl Inner {
    fn on_event(&self, event: &ProxyEvent) {
        if event.spec_id() != self.spec.id {
            return;
        }
        match event {
            ProxyEvent::PendingProxy { proxy_id, .. } => {
                self.pending_delegating
                    .lock()
                    .expect("lock")
                    .push(proxy_id.clone());
                let _ = self.tx.send(Signal::Reconcile);
            }
            ProxyEvent::SeatClaimed { .. } => {
                // One waiting claimant got its seat.
                let mut pending = self.pending_delegating.lock().expect("lock");
                if !pending.is_empty() {
                    pending.remove(0);
                }
                drop(pending);
                let _ = self.tx.send(Signal::Reconcile);
            }
            _ => {}
        }
    }

    /// One build job: delegate skeleton, two-phase resolve, container start,
    /// probe, seat publication. Whatever the outcome, the reservation is
    /// cleared and another reconcile is enqueued so underprovisioning heals
    /// itself.
    async fn create_delegate_proxy(&self, id: String) {
        info!(spec_id = %self.spec.id, delegate_id = %id, "creating delegate proxy");
        if let Err(e) = self.build_delegate(&id).await {
            error!(spec_id = %self.spec.id, delegate_id = %id, error = %e, "failed to start delegate proxy");
        } else {
            info!(spec_id = %self.spec.id, delegate_id = %id, "delegate proxy started");
        }
        self.pending_delegates
            .lock()
            .expect("lock")
            .retain(|pending| pending != &id);
        let _ = self.tx.send(Signal::Reconcile);
    }

    async fn build_delegate(&self, id: &str) -> SharingResult<()> {
        let mut proxy = Proxy::new(id, self.spec.id.clone(), None);
        proxy.add_runtime_value(RuntimeValue::new(
            &runtime_values::PUBLIC_PATH,
            format!("{}{}", public_path_prefix(), id),
        ));
        self.delegate_store
            .add_delegate_proxy(DelegateProxy::new(proxy.clone()))
            .await?;

        // Two-phase resolution: rebuild the context with the partially
        // resolved spec before the final pass.
        let context = SpecExpressionContext::create(Some(&proxy), Some(&self.spec), None)?;
        let resolved = self.spec.first_resolve(&self.resolver, &context)?;
        let context = context.with_spec(&resolved)?;
        let resolved = resolved.final_resolve(&self.resolver, &context)?;

        for container_spec in &resolved.container_specs {
            let container = Container::new(container_spec.index);
            let container = self
                .runtime_values
                .add_container_runtime_values(container_spec, container);
            proxy.containers.push(container);
        }

        let mut proxy = match self.backend.start_proxy(None, proxy, &resolved).await {
            Ok(proxy) => proxy,
            Err(BackendError::ProxyFailedToStart { reason, .. }) => {
                return Err(SharingError::Backend(reason));
            }
            Err(BackendError::Other(e)) => return Err(SharingError::Backend(e.to_string())),
        };
        proxy.refresh_targets();

        if !self.test_strategy.test_proxy(&proxy).await {
            // The delegate is left in place; the periodic reconcile keeps
            // the pool converging around it.
            warn!(spec_id = %self.spec.id, delegate_id = %id, "delegate proxy did not come online");
        }

        proxy.startup_timestamp = now_millis();
        proxy.status = ProxyStatus::Up;

        let seat = Seat::new(self.spec.id.clone(), proxy.id.clone());
        self.delegate_store
            .update_delegate_proxy(DelegateProxy::with_seat(proxy, seat.id))
            .await?;
        self.seat_store.add_seat(seat).await?;
        Ok(())
    }

    /// Retire one delegate whose seats are all unclaimed. `remove_seats`
    /// is the atomic step: a false return means a seat got claimed in the
    /// meantime and the candidate is skipped.
    async fn remove_one_delegate(&self) -> bool {
        for delegate in self.delegate_store.get_all_delegate_proxies().await {
            if delegate.seat_ids.is_empty() {
                continue;
            }
            if self.seat_store.remove_seats(&delegate.seat_ids).await {
                if let Err(e) = self.backend.stop_proxy(&delegate.proxy).await {
                    warn!(
                        delegate_id = %delegate.proxy.id,
                        error = %e,
                        "failed to stop delegate proxy during scale down"
                    );
                }
                self.delegate_store
                    .remove_delegate_proxy(&delegate.proxy.id)
                    .await;
                info!(delegate_id = %delegate.proxy.id, "removed one delegate proxy");
                return true;
            }
        }
        false
    }
}

/// One reconcile pass: compare the pool against the two moving populations
/// and launch or retire builds accordingly.
async fn reconcile(inner: &Arc<Inner>) {
    let unclaimed = inner.seat_store.unclaimed_count(&inner.spec.id).await as i64;
    let pending_builds = inner.pending_delegates.lock().expect("lock").len() as i64;
    let pending_claimants = inner.pending_delegating.lock().expect("lock").len() as i64;
    let minimum = inner.sharing.minimum_seats_available as i64;
    let maximum = inner.sharing.maximum_seats_available as i64;

    let gap = unclaimed + pending_builds - minimum - pending_claimants;
    if gap == 0 {
        debug!(spec_id = %inner.spec.id, "no scaling required");
    } else if gap < 0 {
        let amount = gap.unsigned_abs();
        info!(spec_id = %inner.spec.id, amount, "scale up required");
        for _ in 0..amount {
            let id = Uuid::new_v4().to_string();
            inner.pending_delegates.lock().expect("lock").push(id.clone());
            let job_inner = inner.clone();
            tokio::spawn(async move { job_inner.create_delegate_proxy(id).await });
        }
    } else if gap > maximum {
        let amount = gap - maximum;
        if !inner.sharing.allow_scale_down {
            debug!(
                spec_id = %inner.spec.id,
                amount,
                "scale down required but disabled for this spec"
            );
            return;
        }
        info!(spec_id = %inner.spec.id, amount, "scale down required");
        for _ in 0..amount {
            if !inner.remove_one_delegate().await {
                info!(spec_id = %inner.spec.id, "full scale down not possible");
                break;
            }
        }
    }
}

impl Drop for ProxySharingScaler {
    fn drop(&mut self) {
        self.stop();
    }
}
