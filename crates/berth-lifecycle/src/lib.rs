//! berth-lifecycle — the per-proxy state machine and its orchestration.
//!
//! `ProxyService` is the entry point for starting, stopping, pausing and
//! resuming proxies. Operations split into a synchronous reserve-and-validate
//! phase and a deferred [`Command`](service::Command) the caller schedules,
//! so the HTTP layer can answer before the container has booted.
//!
//! A note about security: the service methods are internal API and take the
//! caller's `Authentication` explicitly; gate checks happen here, but the
//! caller decides which authentication to pass.

pub mod access;
pub mod error;
pub mod mapping;
pub mod runtime_values;
pub mod service;

pub use access::AccessControl;
pub use error::{LifecycleError, LifecycleResult};
pub use mapping::MappingManager;
pub use runtime_values::RuntimeValueService;
pub use service::{Command, ProxyService};
