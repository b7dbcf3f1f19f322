//! Runtime domain types.
//!
//! A `Proxy` is the unit the state machine governs: a user-owned group of
//! containers fronted by reverse-proxy routes. Proxies are immutable values;
//! mutation happens by producing a new value and writing it back to the
//! `ProxyStore`, which holds the authoritative current version.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime_values::RuntimeValue;

/// Current Unix epoch in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle status of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    New,
    Starting,
    Up,
    Stopping,
    Stopped,
    Pausing,
    Paused,
    Resuming,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::New => "new",
            ProxyStatus::Starting => "starting",
            ProxyStatus::Up => "up",
            ProxyStatus::Stopping => "stopping",
            ProxyStatus::Stopped => "stopped",
            ProxyStatus::Pausing => "pausing",
            ProxyStatus::Paused => "paused",
            ProxyStatus::Resuming => "resuming",
        }
    }

    /// Whether readiness tests must be skipped in this status.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProxyStatus::Stopping | ProxyStatus::Stopped | ProxyStatus::Pausing | ProxyStatus::Paused
        )
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: ProxyStatus) -> bool {
        use ProxyStatus::*;
        match (*self, next) {
            (New, Starting) | (New, Up) | (Starting, Up) => true,
            (Up, Pausing) | (Pausing, Paused) | (Paused, Resuming) | (Resuming, Up) => true,
            // Stopping is reachable from every non-terminal status.
            (Stopped, Stopping) | (Stopping, Stopping) => false,
            (_, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

// ── Container ──────────────────────────────────────────────────────

/// A single container inside a proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    /// Stable ordinal of this container within the spec.
    pub index: u32,
    /// Backend-assigned id, absent until the backend has created it.
    pub id: Option<String>,
    /// Keyed values attached to this container.
    pub runtime_values: BTreeMap<String, RuntimeValue>,
    /// Route-name → absolute URI for this container's endpoints.
    pub targets: BTreeMap<String, String>,
}

impl Container {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            id: None,
            runtime_values: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }
}

// ── Proxy ──────────────────────────────────────────────────────────

/// A user-owned group of containers with reverse-proxy routes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proxy {
    pub id: String,
    /// Id of the proxy that owns the containers. Equal to `id` except for
    /// delegating proxies bound to a pooled seat.
    pub target_id: String,
    pub spec_id: String,
    /// Owning user; `None` for pool-owned delegate proxies.
    pub user_id: Option<String>,
    pub display_name: String,
    pub status: ProxyStatus,
    /// Unix millis when the record was created.
    pub created_timestamp: u64,
    /// Unix millis when the proxy reached `Up`; 0 until then.
    pub startup_timestamp: u64,
    pub containers: Vec<Container>,
    pub runtime_values: BTreeMap<String, RuntimeValue>,
    /// Route-name → absolute URI, aggregated from the containers (or
    /// inherited from a delegate when bound to a seat).
    pub targets: BTreeMap<String, String>,
}

impl Proxy {
    /// Create a fresh record in status `New`.
    pub fn new(id: impl Into<String>, spec_id: impl Into<String>, user_id: Option<String>) -> Self {
        let id = id.into();
        Self {
            target_id: id.clone(),
            id,
            spec_id: spec_id.into(),
            user_id,
            display_name: String::new(),
            status: ProxyStatus::New,
            created_timestamp: now_millis(),
            startup_timestamp: 0,
            containers: Vec::new(),
            runtime_values: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    /// Produce a copy with the given status.
    pub fn with_status(&self, status: ProxyStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    pub fn add_runtime_value(&mut self, value: RuntimeValue) {
        self.runtime_values.insert(value.key.id.to_string(), value);
    }

    pub fn runtime_value(&self, key_id: &str) -> Option<&RuntimeValue> {
        self.runtime_values.get(key_id)
    }

    /// Re-derive `targets` from the containers.
    pub fn refresh_targets(&mut self) {
        self.targets.clear();
        for container in &self.containers {
            for (name, uri) in &container.targets {
                self.targets.insert(name.clone(), uri.clone());
            }
        }
    }

    /// Time spent `Up`, if the proxy ever got there.
    pub fn usage_duration(&self) -> Option<Duration> {
        if self.startup_timestamp == 0 {
            return None;
        }
        Some(Duration::from_millis(
            now_millis().saturating_sub(self.startup_timestamp),
        ))
    }
}

// ── Startup log ────────────────────────────────────────────────────

/// Instants recorded across a proxy start, carried on the start event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyStartupLog {
    pub created_at: u64,
    pub container_started_at: Option<u64>,
    pub application_ready_at: Option<u64>,
}

impl ProxyStartupLog {
    pub fn new() -> Self {
        Self {
            created_at: now_millis(),
            container_started_at: None,
            application_ready_at: None,
        }
    }

    pub fn container_started(&mut self) {
        self.container_started_at = Some(now_millis());
    }

    pub fn application_ready(&mut self) {
        self.application_ready_at = Some(now_millis());
    }

    /// Total time from record creation to application ready.
    pub fn startup_duration(&self) -> Option<Duration> {
        self.application_ready_at
            .map(|ready| Duration::from_millis(ready.saturating_sub(self.created_at)))
    }
}

impl Default for ProxyStartupLog {
    fn default() -> Self {
        Self::new()
    }
}

// ── Pool types ─────────────────────────────────────────────────────

/// A reservation of a pre-warmed delegate proxy.
///
/// A seat is *unclaimed* until a delegating proxy takes it; the claim is a
/// status change inside the `SeatStore`, never a create or destroy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub spec_id: String,
    pub delegate_proxy_id: String,
}

impl Seat {
    pub fn new(spec_id: impl Into<String>, delegate_proxy_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec_id: spec_id.into(),
            delegate_proxy_id: delegate_proxy_id.into(),
        }
    }
}

/// A pool-owned proxy and the seats it backs.
///
/// The simple pool form carries exactly one seat per delegate; the set leaves
/// room for containers that can host multiple seats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegateProxy {
    pub proxy: Proxy,
    pub seat_ids: BTreeSet<Uuid>,
}

impl DelegateProxy {
    pub fn new(proxy: Proxy) -> Self {
        Self {
            proxy,
            seat_ids: BTreeSet::new(),
        }
    }

    pub fn with_seat(proxy: Proxy, seat_id: Uuid) -> Self {
        let mut seat_ids = BTreeSet::new();
        seat_ids.insert(seat_id);
        Self { proxy, seat_ids }
    }
}
