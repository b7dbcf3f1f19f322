//! Claim handoff between user starts and the seat pool.
//!
//! A shared start announces itself with `PendingProxy` (so the scaler counts
//! the waiting user) and then tries to claim a seat, polling until the pool
//! produces one or the deadline passes. On a hit the delegating proxy is
//! rewritten to target the seat's delegate: the delegate owns the
//! containers, the user-visible proxy owns only the route binding.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use berth_core::error::CoreError;
use berth_core::event::{EventBus, ProxyEvent};
use berth_core::model::{now_millis, Proxy, ProxyStatus, Seat};
use berth_core::runtime_values::{self, RuntimeValue};
use berth_core::spec::ProxySpec;
use berth_lifecycle::MappingManager;
use berth_state::{DelegateProxyStore, ProxyStore, SeatStore};

use crate::error::{SharingError, SharingResult};

/// Minimum poll cadence while waiting for a seat; bus events wake the loop
/// earlier.
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Binds delegating proxies to pooled seats.
pub struct ProxySharingDispatcher {
    proxy_store: Arc<dyn ProxyStore>,
    seat_store: Arc<dyn SeatStore>,
    delegate_store: Arc<dyn DelegateProxyStore>,
    mapping_manager: Arc<MappingManager>,
    event_bus: EventBus,
    claim_timeout: Duration,
}

impl ProxySharingDispatcher {
    pub fn new(
        proxy_store: Arc<dyn ProxyStore>,
        seat_store: Arc<dyn SeatStore>,
        delegate_store: Arc<dyn DelegateProxyStore>,
        mapping_manager: Arc<MappingManager>,
        event_bus: EventBus,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            proxy_store,
            seat_store,
            delegate_store,
            mapping_manager,
            event_bus,
            claim_timeout,
        }
    }

    /// Whether a spec's proxies go through the pool at all.
    pub fn supports(spec: &ProxySpec) -> bool {
        spec.sharing.is_some()
    }

    /// Claim a seat for the given (already stored) proxy, waiting for the
    /// pool when it is momentarily empty. Returns the bound proxy.
    pub async fn acquire_seat(&self, proxy: &Proxy) -> SharingResult<Proxy> {
        // Subscribe before announcing, so the wake-up for a seat built in
        // response to this very announcement cannot be missed.
        let mut events = self.event_bus.subscribe();
        self.event_bus.publish(ProxyEvent::PendingProxy {
            proxy_id: proxy.id.clone(),
            user_id: proxy.user_id.clone(),
            spec_id: proxy.spec_id.clone(),
        });

        let deadline = Instant::now() + self.claim_timeout;
        loop {
            if let Some(seat) = self.seat_store.claim_seat(&proxy.spec_id).await {
                return self.bind(proxy, seat).await;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SharingError::SeatWaitTimeout(proxy.id.clone()));
            }
            debug!(proxy_id = %proxy.id, "no seat available yet, waiting");
            tokio::select! {
                event = events.recv() => {
                    // Any pool activity is a reason to retry; lag only means
                    // missed wake-ups, the poll below covers those.
                    let _ = event;
                }
                _ = tokio::time::sleep(remaining.min(CLAIM_POLL_INTERVAL)) => {}
            }
        }
    }

    async fn bind(&self, proxy: &Proxy, seat: Seat) -> SharingResult<Proxy> {
        let delegate = self
            .delegate_store
            .get_delegate_proxy(&seat.delegate_proxy_id)
            .await
            .ok_or_else(|| {
                CoreError::NotFound(format!("delegate proxy {}", seat.delegate_proxy_id))
            })?;

        let mut bound = proxy.clone();
        bound.target_id = seat.delegate_proxy_id.clone();
        bound.status = ProxyStatus::Up;
        bound.startup_timestamp = now_millis();
        bound.add_runtime_value(RuntimeValue::new(&runtime_values::SEAT_ID, seat.id.to_string()));
        bound.targets = delegate.proxy.targets.clone();

        for (name, uri) in &bound.targets {
            self.mapping_manager.add_mapping(&bound.id, name, uri).await?;
        }
        self.proxy_store.update_proxy(bound.clone()).await?;

        info!(
            proxy_id = %bound.id,
            seat_id = %seat.id,
            delegate_id = %seat.delegate_proxy_id,
            "proxy bound to seat"
        );
        self.event_bus.publish(ProxyEvent::SeatClaimed {
            spec_id: seat.spec_id.clone(),
            seat_id: seat.id,
            delegate_proxy_id: seat.delegate_proxy_id.clone(),
        });
        Ok(bound)
    }

    /// Return a bound proxy's seat to the pool, e.g. when the delegating
    /// proxy stops.
    pub async fn release_seat(&self, proxy: &Proxy) -> SharingResult<()> {
        let value = proxy
            .runtime_value(runtime_values::SEAT_ID.id)
            .ok_or_else(|| CoreError::NotFound(format!("proxy {} holds no seat", proxy.id)))?;
        let seat_id = Uuid::parse_str(&value.value)
            .map_err(|e| CoreError::IllegalState(format!("malformed seat id: {e}")))?;
        self.seat_store.release_seat(&seat_id).await?;
        info!(proxy_id = %proxy.id, seat_id = %seat_id, "seat released");
        Ok(())
    }
}
