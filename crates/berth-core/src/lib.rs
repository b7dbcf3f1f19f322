//! berth-core — domain model and consumed interfaces of the proxy lifecycle engine.
//!
//! This crate holds everything the lifecycle and pool-scaling crates share:
//!
//! - **`model`** — runtime values: `Proxy`, `ProxyStatus`, `Container`, `Seat`, `DelegateProxy`
//! - **`spec`** — declarative templates: `ProxySpec`, `ContainerSpec`, sharing extension
//! - **`expression`** — two-phase `#{...}` placeholder resolution over a spec
//! - **`runtime_values`** — keyed values injected into proxies around resolution
//! - **`event`** — lifecycle events and the in-process `EventBus`
//! - **`backend`** — the `ContainerBackend` seam towards container drivers
//! - **`probe`** — readiness test strategies
//! - **`leader`** — single-writer election seam for pool mutations
//! - **`provider`** — registered-spec lookup
//! - **`config`** — process-wide configuration
//! - **`error`** — the error taxonomy surfaced to callers

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod expression;
pub mod leader;
pub mod model;
pub mod probe;
pub mod provider;
pub mod runtime_values;
pub mod spec;

pub use auth::Authentication;
pub use backend::{BackendError, ContainerBackend};
pub use config::BerthConfig;
pub use error::{CoreError, CoreResult};
pub use event::{EventBus, EventEnvelope, ProxyEvent};
pub use expression::{SpecExpressionContext, SpecResolver};
pub use leader::{LeaderService, StaticLeaderService};
pub use model::{Container, DelegateProxy, Proxy, ProxyStartupLog, ProxyStatus, Seat};
pub use probe::{StaticTestStrategy, TcpTestStrategy, TestStrategy};
pub use provider::{MemorySpecProvider, SpecProvider};
pub use runtime_values::{RuntimeValue, RuntimeValueKey};
pub use spec::{AccessControlSpec, ContainerSpec, ParameterSpec, PortTarget, ProxySharingSpec, ProxySpec};
