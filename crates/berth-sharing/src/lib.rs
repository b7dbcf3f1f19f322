//! berth-sharing — the pre-warmed seat pool.
//!
//! For every spec that declares a sharing extension, a [`ProxySharingScaler`]
//! keeps a pool of pre-started delegate proxies so user requests claim a
//! ready seat instead of waiting on a cold container start. The scaler is a
//! leader-gated reconciler: it compares unclaimed seats plus builds in
//! flight against the configured minimum plus waiting claimants, and scales
//! the pool accordingly.
//!
//! [`ProxySharingDispatcher`] is the user-facing half: it announces a
//! pending proxy, claims a seat (waiting for the pool when empty) and binds
//! the delegating proxy to the seat's delegate.

pub mod dispatcher;
pub mod error;
pub mod scaler;

pub use dispatcher::ProxySharingDispatcher;
pub use error::{SharingError, SharingResult};
pub use scaler::ProxySharingScaler;
