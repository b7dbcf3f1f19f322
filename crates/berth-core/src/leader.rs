//! Single-writer election seam.
//!
//! Pool mutations for a spec must happen on at most one instance at a time.
//! The election mechanism itself (Redis lock, Raft, ...) is an external
//! collaborator; the core only asks "am I the leader right now".

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether this instance currently holds leadership.
pub trait LeaderService: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Fixed leadership for single-instance deployments and tests.
pub struct StaticLeaderService {
    leader: AtomicBool,
}

impl StaticLeaderService {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl LeaderService for StaticLeaderService {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
