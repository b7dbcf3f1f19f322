//! The seat pool.
//!
//! Seats move between exactly two states, unclaimed and claimed; a claim is
//! a status change, never a create or destroy, so the total seat count per
//! spec is preserved across claims and releases.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use berth_core::model::Seat;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Pool of unclaimed and claimed seats, keyed by spec.
#[async_trait]
pub trait SeatStore: Send + Sync {
    /// Publish a new seat into the unclaimed pool.
    async fn add_seat(&self, seat: Seat) -> StoreResult<()>;

    /// Atomically take one unclaimed seat of the spec, if any.
    async fn claim_seat(&self, spec_id: &str) -> Option<Seat>;

    /// Return a claimed seat to the unclaimed pool.
    async fn release_seat(&self, seat_id: &Uuid) -> StoreResult<()>;

    /// Destroy the given seats. All-or-nothing: returns false without
    /// removing anything when any of them is currently claimed or missing.
    async fn remove_seats(&self, seat_ids: &BTreeSet<Uuid>) -> bool;

    async fn unclaimed_count(&self, spec_id: &str) -> usize;

    /// Unclaimed plus claimed.
    async fn total_count(&self, spec_id: &str) -> usize;
}

#[derive(Default)]
struct SpecSeats {
    unclaimed: VecDeque<Seat>,
    claimed: HashMap<Uuid, Seat>,
}

/// In-memory seat store.
pub struct MemorySeatStore {
    // A single lock over all specs keeps claim and remove_seats atomic.
    seats: Mutex<HashMap<String, SpecSeats>>,
}

impl MemorySeatStore {
    pub fn new() -> Self {
        Self {
            seats: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySeatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SeatStore for MemorySeatStore {
    async fn add_seat(&self, seat: Seat) -> StoreResult<()> {
        let mut seats = self.seats.lock().await;
        let pool = seats.entry(seat.spec_id.clone()).or_default();
        if pool.claimed.contains_key(&seat.id) || pool.unclaimed.iter().any(|s| s.id == seat.id) {
            return Err(StoreError::Duplicate(seat.id.to_string()));
        }
        debug!(seat_id = %seat.id, spec_id = %seat.spec_id, "seat published");
        pool.unclaimed.push_back(seat);
        Ok(())
    }

    async fn claim_seat(&self, spec_id: &str) -> Option<Seat> {
        let mut seats = self.seats.lock().await;
        let pool = seats.get_mut(spec_id)?;
        let seat = pool.unclaimed.pop_front()?;
        debug!(seat_id = %seat.id, %spec_id, "seat claimed");
        pool.claimed.insert(seat.id, seat.clone());
        Some(seat)
    }

    async fn release_seat(&self, seat_id: &Uuid) -> StoreResult<()> {
        let mut seats = self.seats.lock().await;
        for pool in seats.values_mut() {
            if let Some(seat) = pool.claimed.remove(seat_id) {
                debug!(seat_id = %seat.id, spec_id = %seat.spec_id, "seat released");
                pool.unclaimed.push_back(seat);
                return Ok(());
            }
        }
        Err(StoreError::NotFound(seat_id.to_string()))
    }

    async fn remove_seats(&self, seat_ids: &BTreeSet<Uuid>) -> bool {
        let mut seats = self.seats.lock().await;
        // Verify first: every seat must be present and unclaimed.
        for seat_id in seat_ids {
            let unclaimed = seats
                .values()
                .any(|pool| pool.unclaimed.iter().any(|s| s.id == *seat_id));
            if !unclaimed {
                return false;
            }
        }
        for pool in seats.values_mut() {
            pool.unclaimed.retain(|s| !seat_ids.contains(&s.id));
        }
        true
    }

    async fn unclaimed_count(&self, spec_id: &str) -> usize {
        self.seats
            .lock()
            .await
            .get(spec_id)
            .map(|pool| pool.unclaimed.len())
            .unwrap_or(0)
    }

    async fn total_count(&self, spec_id: &str) -> usize {
        self.seats
            .lock()
            .await
            .get(spec_id)
            .map(|pool| pool.unclaimed.len() + pool.claimed.len())
            .unwrap_or(0)
    }
}
