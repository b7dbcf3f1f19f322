//! Process-wide configuration.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

static PUBLIC_PATH_PREFIX: OnceLock<String> = OnceLock::new();

const DEFAULT_PUBLIC_PATH_PREFIX: &str = "/api/route/";

/// Prefix under which proxy routes are mounted.
pub fn public_path_prefix() -> &'static str {
    PUBLIC_PATH_PREFIX
        .get()
        .map(String::as_str)
        .unwrap_or(DEFAULT_PUBLIC_PATH_PREFIX)
}

/// Set the prefix. Init-once: call during startup, never at request time.
/// Returns false when the prefix was already set.
pub fn set_public_path_prefix(prefix: impl Into<String>) -> bool {
    PUBLIC_PATH_PREFIX.set(prefix.into()).is_ok()
}

/// Top-level configuration of the lifecycle core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    /// Stop all proxies on shutdown; disabling permits hot restarts, leaving
    /// containers to the backend.
    pub stop_proxies_on_shutdown: bool,
    /// Readiness probe deadline in seconds.
    pub probe_deadline_secs: u64,
    /// Delay between probe attempts in milliseconds.
    pub probe_interval_millis: u64,
    /// Pool reconcile tick in seconds.
    pub reconcile_interval_secs: u64,
    /// How long a delegating proxy waits for a seat before giving up,
    /// in seconds.
    pub seat_claim_timeout_secs: u64,
    /// Default heartbeat timeout injected into proxies, in seconds.
    pub heartbeat_timeout_secs: u64,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            stop_proxies_on_shutdown: true,
            probe_deadline_secs: 60,
            probe_interval_millis: 500,
            reconcile_interval_secs: 10,
            seat_claim_timeout_secs: 60,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BerthConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_millis)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn seat_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.seat_claim_timeout_secs)
    }
}
