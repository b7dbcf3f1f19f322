//! Lifecycle events and the in-process event bus.
//!
//! Every state transition publishes exactly one event. Events are wrapped in
//! an envelope tagged with the publishing instance's identifier, so bridges
//! that replicate events between instances can drop echoes of their own
//! publications.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::model::ProxyStartupLog;

/// A lifecycle event, observable by bridges, audit and the pool scalers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyEvent {
    ProxyStarted {
        proxy_id: String,
        user_id: Option<String>,
        spec_id: String,
        startup_log: ProxyStartupLog,
    },
    ProxyStopped {
        proxy_id: String,
        user_id: Option<String>,
        spec_id: String,
        /// Absent when the proxy never reached `Up`.
        usage: Option<Duration>,
    },
    ProxyStartFailed {
        proxy_id: Option<String>,
        user_id: Option<String>,
        spec_id: String,
    },
    ProxyPaused {
        proxy_id: String,
        user_id: Option<String>,
        spec_id: String,
    },
    ProxyResumed {
        proxy_id: String,
        user_id: Option<String>,
        spec_id: String,
    },
    /// A user is waiting for a seat of this spec.
    PendingProxy {
        proxy_id: String,
        user_id: Option<String>,
        spec_id: String,
    },
    /// A seat just left the unclaimed pool.
    SeatClaimed {
        spec_id: String,
        seat_id: Uuid,
        delegate_proxy_id: String,
    },
}

impl ProxyEvent {
    /// Spec the event belongs to; scalers filter on this.
    pub fn spec_id(&self) -> &str {
        match self {
            ProxyEvent::ProxyStarted { spec_id, .. }
            | ProxyEvent::ProxyStopped { spec_id, .. }
            | ProxyEvent::ProxyStartFailed { spec_id, .. }
            | ProxyEvent::ProxyPaused { spec_id, .. }
            | ProxyEvent::ProxyResumed { spec_id, .. }
            | ProxyEvent::PendingProxy { spec_id, .. }
            | ProxyEvent::SeatClaimed { spec_id, .. } => spec_id,
        }
    }
}

/// An event plus the identifier of the instance that published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub source: String,
    pub event: ProxyEvent,
}

/// In-process publish/subscribe for lifecycle events.
///
/// Backed by a broadcast channel; publishing never blocks and a publish with
/// no live subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    source: String,
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(source: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            source: source.into(),
            tx,
        }
    }

    /// Identifier stamped on every envelope published through this bus.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn publish(&self, event: ProxyEvent) {
        debug!(source = %self.source, ?event, "publishing event");
        let _ = self.tx.send(EventEnvelope {
            source: self.source.clone(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}
