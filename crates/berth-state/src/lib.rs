//! berth-state — store interfaces and their in-memory reference
//! implementations.
//!
//! The lifecycle engine and the pool scaler only ever see the traits; each
//! store owns its synchronization. The in-memory implementations here back
//! single-instance deployments and every test. Networked implementations
//! (shared Redis, a database) plug in behind the same traits and must keep
//! the same atomicity guarantees, most importantly the all-or-nothing
//! `claim_seat`/`remove_seats` pair.

pub mod delegates;
pub mod error;
pub mod proxies;
pub mod seats;

pub use delegates::{DelegateProxyStore, MemoryDelegateProxyStore};
pub use error::{StoreError, StoreResult};
pub use proxies::{MemoryProxyStore, ProxyStore};
pub use seats::{MemorySeatStore, SeatStore};
