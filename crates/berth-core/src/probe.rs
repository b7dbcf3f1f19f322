//! Readiness test strategies.
//!
//! A test strategy decides whether a freshly started proxy is ready to
//! receive traffic. Strategies own their retry budget; the lifecycle engine
//! only sees the final verdict.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::model::Proxy;

/// Readiness probe for a started proxy.
#[async_trait]
pub trait TestStrategy: Send + Sync {
    /// True once the proxy answers on its targets, false when the retry
    /// budget is exhausted. Proxies in an unavailable status test false.
    async fn test_proxy(&self, proxy: &Proxy) -> bool;
}

/// Probes the first target's TCP endpoint until it accepts a connection.
///
/// Route-level HTTP checks belong to the proxying layer; at this level a
/// listening socket is what "the container came up" means.
pub struct TcpTestStrategy {
    deadline: Duration,
    interval: Duration,
}

impl TcpTestStrategy {
    pub fn new(deadline: Duration, interval: Duration) -> Self {
        Self { deadline, interval }
    }
}

impl Default for TcpTestStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_millis(500))
    }
}

#[async_trait]
impl TestStrategy for TcpTestStrategy {
    async fn test_proxy(&self, proxy: &Proxy) -> bool {
        if proxy.status.is_unavailable() {
            return false;
        }
        let address = match proxy.targets.values().next().and_then(|uri| authority_of(uri)) {
            Some(address) => address,
            None => {
                debug!(proxy_id = %proxy.id, "no probe target, treating proxy as ready");
                return true;
            }
        };

        let deadline = Instant::now() + self.deadline;
        loop {
            match tokio::time::timeout(self.interval, tokio::net::TcpStream::connect(&address)).await
            {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => {
                    debug!(proxy_id = %proxy.id, %address, error = %e, "probe connect failed")
                }
                Err(_) => debug!(proxy_id = %proxy.id, %address, "probe connect timed out"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Extract `host:port` from an absolute http URI.
fn authority_of(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("http://").or_else(|| uri.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    Some(if authority.contains(':') {
        authority.to_string()
    } else if uri.starts_with("https://") {
        format!("{authority}:443")
    } else {
        format!("{authority}:80")
    })
}

/// Fixed-verdict strategy for tests and for backends that are ready by
/// construction.
pub struct StaticTestStrategy(pub bool);

#[async_trait]
impl TestStrategy for StaticTestStrategy {
    async fn test_proxy(&self, _proxy: &Proxy) -> bool {
        self.0
    }
}
