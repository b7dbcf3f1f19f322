//! Pool reconciliation scenarios against an in-memory harness.
//!
//! The harness disables the periodic tick (one-hour interval) so every
//! reconcile is driven by an explicit trigger or by bus events; each phase
//! of a test waits for the pool to quiesce before moving on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use berth_core::auth::Authentication;
use berth_core::backend::{BackendResult, ContainerBackend};
use berth_core::event::{EventBus, ProxyEvent};
use berth_core::expression::SpecResolver;
use berth_core::leader::{LeaderService, StaticLeaderService};
use berth_core::model::{Container, DelegateProxy, Proxy, ProxyStatus, Seat};
use berth_core::probe::StaticTestStrategy;
use berth_core::spec::{ContainerSpec, PortTarget, ProxySharingSpec, ProxySpec};
use berth_core::BerthConfig;
use berth_lifecycle::{MappingManager, RuntimeValueService};
use berth_sharing::{ProxySharingDispatcher, ProxySharingScaler, SharingError};
use berth_state::{
    DelegateProxyStore, MemoryDelegateProxyStore, MemoryProxyStore, MemorySeatStore, ProxyStore,
    SeatStore,
};

// ── Stub backend ───────────────────────────────────────────────────

/// Backend whose targets are namespaced by proxy id, the way real drivers
/// derive them from the public path.
struct PoolBackend {
    stopped: Mutex<Vec<String>>,
}

impl PoolBackend {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContainerBackend for PoolBackend {
    async fn start_proxy(
        &self,
        _auth: Option<&Authentication>,
        mut proxy: Proxy,
        spec: &ProxySpec,
    ) -> BackendResult<Proxy> {
        for (slot, container_spec) in spec.container_specs.iter().enumerate() {
            let container = proxy
                .containers
                .get_mut(slot)
                .expect("scaler assembles containers before the backend call");
            container.id = Some(format!("c-{}-{}", proxy.id, container_spec.index));
            for target in &container_spec.port_targets {
                container.targets.insert(
                    format!("{}/{}", proxy.id, target.name),
                    format!("http://127.0.0.1:{}/", target.port),
                );
            }
        }
        Ok(proxy)
    }

    async fn stop_proxy(&self, proxy: &Proxy) -> anyhow::Result<()> {
        self.stopped.lock().await.push(proxy.id.clone());
        Ok(())
    }

    async fn pause_proxy(&self, _proxy: &Proxy) -> anyhow::Result<()> {
        anyhow::bail!("pool backend does not pause")
    }

    async fn resume_proxy(&self, _proxy: Proxy, _spec: &ProxySpec) -> BackendResult<Proxy> {
        Err(berth_core::backend::BackendError::Other(anyhow::anyhow!(
            "pool backend does not resume"
        )))
    }

    fn supports_pause(&self) -> bool {
        false
    }
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    scaler: ProxySharingScaler,
    dispatcher: ProxySharingDispatcher,
    proxy_store: Arc<MemoryProxyStore>,
    seat_store: Arc<MemorySeatStore>,
    delegate_store: Arc<MemoryDelegateProxyStore>,
    leader: Arc<StaticLeaderService>,
    backend: Arc<PoolBackend>,
    bus: EventBus,
    _shutdown: watch::Sender<bool>,
}

fn sharing_spec(id: &str, minimum: u32, maximum: u32, allow_scale_down: bool) -> ProxySpec {
    let mut spec = ProxySpec::new(id);
    let mut container = ContainerSpec::new(0, "registry/shared-app:latest");
    container.port_targets.push(PortTarget {
        name: "u".to_string(),
        port: 3838,
    });
    spec.container_specs.push(container);
    spec.sharing = Some(ProxySharingSpec {
        minimum_seats_available: minimum,
        maximum_seats_available: maximum,
        allow_scale_down,
    });
    spec
}

fn harness(spec: ProxySpec, leader: bool) -> Harness {
    harness_with_stores(
        spec,
        leader,
        Arc::new(MemorySeatStore::new()),
        Arc::new(MemoryDelegateProxyStore::new()),
    )
}

/// Build the harness around pre-seeded stores; the scaler's first tick sees
/// whatever they already contain.
fn harness_with_stores(
    spec: ProxySpec,
    leader: bool,
    seat_store: Arc<MemorySeatStore>,
    delegate_store: Arc<MemoryDelegateProxyStore>,
) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let proxy_store = Arc::new(MemoryProxyStore::new());
    let mapping = Arc::new(MappingManager::new());
    let leader = Arc::new(StaticLeaderService::new(leader));
    let backend = Arc::new(PoolBackend::new());
    let bus = EventBus::new("test-node");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One-hour tick: beyond the immediate first tick, reconciles in tests
    // come from triggers and events only.
    let config = BerthConfig {
        reconcile_interval_secs: 3600,
        ..BerthConfig::default()
    };

    let leader_service: Arc<dyn LeaderService> = leader.clone();
    let scaler = ProxySharingScaler::spawn(
        spec,
        leader_service,
        seat_store.clone(),
        delegate_store.clone(),
        backend.clone(),
        Arc::new(SpecResolver::new()),
        Arc::new(RuntimeValueService::new(&config)),
        Arc::new(StaticTestStrategy(true)),
        &bus,
        &config,
        shutdown_rx,
    )
    .unwrap();

    let dispatcher = ProxySharingDispatcher::new(
        proxy_store.clone(),
        seat_store.clone(),
        delegate_store.clone(),
        mapping,
        bus.clone(),
        Duration::from_secs(5),
    );

    Harness {
        scaler,
        dispatcher,
        proxy_store,
        seat_store,
        delegate_store,
        leader,
        backend,
        bus,
        _shutdown: shutdown_tx,
    }
}

async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn seed_delegate(
    seat_store: &MemorySeatStore,
    delegate_store: &MemoryDelegateProxyStore,
    spec_id: &str,
    id: &str,
) -> Seat {
    let mut proxy = Proxy::new(id, spec_id, None);
    proxy.status = ProxyStatus::Up;
    let mut container = Container::new(0);
    container
        .targets
        .insert(format!("{id}/u"), "http://127.0.0.1:3838/".to_string());
    proxy.containers.push(container);
    proxy.refresh_targets();

    let seat = Seat::new(spec_id, id);
    delegate_store
        .add_delegate_proxy(DelegateProxy::with_seat(proxy, seat.id))
        .await
        .unwrap();
    seat_store.add_seat(seat.clone()).await.unwrap();
    seat
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn s4_pool_warm_up() {
    let h = harness(sharing_spec("s4", 2, 3, false), true);
    h.scaler.trigger_reconcile();

    let warmed = wait_until(
        || async { h.seat_store.unclaimed_count("s4").await == 2 },
        Duration::from_secs(5),
    )
    .await;
    assert!(warmed, "pool never reached 2 unclaimed seats");

    let delegates = h.delegate_store.get_all_delegate_proxies().await;
    assert_eq!(delegates.len(), 2);
    for delegate in &delegates {
        assert_eq!(delegate.proxy.status, ProxyStatus::Up);
        assert_eq!(delegate.seat_ids.len(), 1);
        assert!(delegate.proxy.startup_timestamp > 0);
    }
    assert_eq!(h.scaler.pending_build_count(), 0);
}

#[tokio::test]
async fn s5_claim_and_replace() {
    let h = harness(sharing_spec("s4", 2, 3, false), true);
    h.scaler.trigger_reconcile();
    assert!(
        wait_until(
            || async { h.seat_store.unclaimed_count("s4").await == 2 },
            Duration::from_secs(5),
        )
        .await
    );

    // A user announces itself; the scaler provisions a replacement build
    // for the seat about to disappear.
    h.bus.publish(ProxyEvent::PendingProxy {
        proxy_id: "p-user".to_string(),
        user_id: Some("alice".to_string()),
        spec_id: "s4".to_string(),
    });
    assert!(
        wait_until(
            || async {
                h.seat_store.unclaimed_count("s4").await == 3
                    && h.scaler.pending_build_count() == 0
            },
            Duration::from_secs(5),
        )
        .await,
        "exactly one replacement build expected"
    );
    assert_eq!(h.delegate_store.get_all_delegate_proxies().await.len(), 3);

    // The waiting user claims its seat.
    let proxy = Proxy::new("p-user", "s4", Some("alice".to_string()));
    h.proxy_store.add_proxy(proxy.clone()).await.unwrap();
    let seat = h.seat_store.claim_seat("s4").await.unwrap();
    assert_eq!(h.seat_store.unclaimed_count("s4").await, 2);
    h.bus.publish(ProxyEvent::SeatClaimed {
        spec_id: "s4".to_string(),
        seat_id: seat.id,
        delegate_proxy_id: seat.delegate_proxy_id.clone(),
    });

    // The pool settles back at the minimum with no further builds.
    assert!(
        wait_until(
            || async {
                h.scaler.pending_claimant_count() == 0 && h.scaler.pending_build_count() == 0
            },
            Duration::from_secs(5),
        )
        .await
    );
    assert_eq!(h.seat_store.unclaimed_count("s4").await, 2);
    assert_eq!(h.delegate_store.get_all_delegate_proxies().await.len(), 3);
    // The claim preserved the total seat count.
    assert_eq!(h.seat_store.total_count("s4").await, 3);
}

#[tokio::test]
async fn scaler_never_provisions_while_not_leader() {
    let h = harness(sharing_spec("s4", 2, 3, false), false);
    h.scaler.trigger_reconcile();

    for i in 0..4 {
        h.bus.publish(ProxyEvent::PendingProxy {
            proxy_id: format!("p-{i}"),
            user_id: Some("alice".to_string()),
            spec_id: "s4".to_string(),
        });
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.scaler.pending_build_count(), 0);
    assert!(h.delegate_store.get_all_delegate_proxies().await.is_empty());
    assert_eq!(h.seat_store.unclaimed_count("s4").await, 0);
}

#[tokio::test]
async fn scaler_resumes_after_regaining_leadership() {
    let h = harness(sharing_spec("s4", 1, 2, false), false);

    // Signals seen while not leader are discarded, not fatal.
    h.scaler.trigger_reconcile();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.delegate_store.get_all_delegate_proxies().await.is_empty());

    h.leader.set_leader(true);
    h.scaler.trigger_reconcile();
    assert!(
        wait_until(
            || async { h.seat_store.unclaimed_count("s4").await == 1 },
            Duration::from_secs(5),
        )
        .await
    );
}

#[tokio::test]
async fn dispatcher_binds_proxy_to_seat() {
    let h = harness(sharing_spec("s4", 2, 3, false), false);
    let seat = seed_delegate(&h.seat_store, &h.delegate_store, "s4", "d-1").await;

    let mut events = h.bus.subscribe();
    let proxy = Proxy::new("p-user", "s4", Some("alice".to_string()));
    h.proxy_store.add_proxy(proxy.clone()).await.unwrap();

    let bound = h.dispatcher.acquire_seat(&proxy).await.unwrap();
    assert_eq!(bound.id, "p-user");
    assert_eq!(bound.target_id, "d-1");
    assert_eq!(bound.status, ProxyStatus::Up);
    assert!(bound.targets.contains_key("d-1/u"));

    let stored = h.proxy_store.get_proxy("p-user").await.unwrap();
    assert_eq!(stored.target_id, "d-1");

    // PendingProxy first, then SeatClaimed for the same seat.
    let first = events.recv().await.unwrap().event;
    assert!(matches!(first, ProxyEvent::PendingProxy { .. }));
    let second = events.recv().await.unwrap().event;
    match second {
        ProxyEvent::SeatClaimed {
            seat_id,
            delegate_proxy_id,
            ..
        } => {
            assert_eq!(seat_id, seat.id);
            assert_eq!(delegate_proxy_id, "d-1");
        }
        other => panic!("expected SeatClaimed, got {other:?}"),
    }
}

#[tokio::test]
async fn dispatcher_waits_for_a_late_seat() {
    let h = harness(sharing_spec("s4", 2, 3, false), false);
    let proxy = Proxy::new("p-user", "s4", Some("alice".to_string()));
    h.proxy_store.add_proxy(proxy.clone()).await.unwrap();

    let dispatcher = h.dispatcher;
    let claim = tokio::spawn(async move { dispatcher.acquire_seat(&proxy).await });

    // The pool produces a seat a moment later.
    tokio::time::sleep(Duration::from_millis(150)).await;
    seed_delegate(&h.seat_store, &h.delegate_store, "s4", "d-late").await;

    let bound = claim.await.unwrap().unwrap();
    assert_eq!(bound.target_id, "d-late");
}

#[tokio::test]
async fn dispatcher_times_out_on_empty_pool() {
    let h = harness(sharing_spec("s4", 2, 3, false), false);
    let dispatcher = ProxySharingDispatcher::new(
        h.proxy_store.clone(),
        h.seat_store.clone(),
        h.delegate_store.clone(),
        Arc::new(MappingManager::new()),
        h.bus.clone(),
        Duration::from_millis(200),
    );

    let proxy = Proxy::new("p-user", "s4", Some("alice".to_string()));
    h.proxy_store.add_proxy(proxy.clone()).await.unwrap();

    let result = dispatcher.acquire_seat(&proxy).await;
    assert!(matches!(result, Err(SharingError::SeatWaitTimeout(_))));
}

#[tokio::test]
async fn release_returns_seat_to_pool() {
    let h = harness(sharing_spec("s4", 2, 3, false), false);
    seed_delegate(&h.seat_store, &h.delegate_store, "s4", "d-1").await;

    let proxy = Proxy::new("p-user", "s4", Some("alice".to_string()));
    h.proxy_store.add_proxy(proxy.clone()).await.unwrap();
    let bound = h.dispatcher.acquire_seat(&proxy).await.unwrap();
    assert_eq!(h.seat_store.unclaimed_count("s4").await, 0);

    h.dispatcher.release_seat(&bound).await.unwrap();
    assert_eq!(h.seat_store.unclaimed_count("s4").await, 1);
    assert_eq!(h.seat_store.total_count("s4").await, 1);
}

#[tokio::test]
async fn scale_down_retires_surplus_delegates() {
    // Seed before the scaler starts so its first tick sees the surplus.
    let seat_store = Arc::new(MemorySeatStore::new());
    let delegate_store = Arc::new(MemoryDelegateProxyStore::new());
    for i in 0..5 {
        seed_delegate(&seat_store, &delegate_store, "s4", &format!("d-{i}")).await;
    }
    // One delegate's seat is claimed; it must survive the sweep.
    let claimed = seat_store.claim_seat("s4").await.unwrap();

    let h = harness_with_stores(sharing_spec("s4", 1, 2, true), true, seat_store, delegate_store);

    // gap = 4 - 1 = 3 > maximum 2 → one removal step.
    h.scaler.trigger_reconcile();
    assert!(
        wait_until(
            || async { h.seat_store.unclaimed_count("s4").await == 3 },
            Duration::from_secs(5),
        )
        .await
    );

    let remaining = h.delegate_store.get_all_delegate_proxies().await;
    assert_eq!(remaining.len(), 4);
    assert!(remaining
        .iter()
        .any(|d| d.proxy.id == claimed.delegate_proxy_id));
    assert_eq!(h.backend.stopped.lock().await.len(), 1);
    // Claimed seat untouched.
    assert_eq!(h.seat_store.total_count("s4").await, 4);
}

#[tokio::test]
async fn scale_down_disabled_by_default() {
    let seat_store = Arc::new(MemorySeatStore::new());
    let delegate_store = Arc::new(MemoryDelegateProxyStore::new());
    for i in 0..5 {
        seed_delegate(&seat_store, &delegate_store, "s4", &format!("d-{i}")).await;
    }

    let h = harness_with_stores(sharing_spec("s4", 1, 2, false), true, seat_store, delegate_store);
    h.scaler.trigger_reconcile();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.seat_store.unclaimed_count("s4").await, 5);
    assert_eq!(h.delegate_store.get_all_delegate_proxies().await.len(), 5);
    assert!(h.backend.stopped.lock().await.is_empty());
}

#[tokio::test]
async fn spawn_rejects_spec_without_sharing_extension() {
    let seat_store = Arc::new(MemorySeatStore::new());
    let delegate_store = Arc::new(MemoryDelegateProxyStore::new());
    let bus = EventBus::new("test-node");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = BerthConfig::default();

    let result = ProxySharingScaler::spawn(
        ProxySpec::new("plain"),
        Arc::new(StaticLeaderService::new(true)),
        seat_store,
        delegate_store,
        Arc::new(PoolBackend::new()),
        Arc::new(SpecResolver::new()),
        Arc::new(RuntimeValueService::new(&config)),
        Arc::new(StaticTestStrategy(true)),
        &bus,
        &config,
        shutdown_rx,
    );
    drop(shutdown_tx);
    assert!(matches!(result, Err(SharingError::NotShared(_))));
}
