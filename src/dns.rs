// Name resolution with a bounded cache lifetime

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::time::Instant;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone)]
struct CachedAddrs {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

/// Resolver that reuses lookups for `ttl` before asking the system again
#[derive(Clone)]
pub struct CachingResolver {
    ttl: Duration,
    entries: Arc<DashMap<String, CachedAddrs>>,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Number of hosts currently cached
    pub fn cached_hosts(&self) -> usize {
        self.entries.len()
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_host(
            Arc::clone(&self.entries),
            name.as_str().to_string(),
            self.ttl,
        ))
    }
}

/// Cached addresses for `host`, if resolved less than `ttl` ago
fn lookup_cached(
    entries: &DashMap<String, CachedAddrs>,
    host: &str,
    ttl: Duration,
) -> Option<Vec<SocketAddr>> {
    if let Some(entry) = entries.get(host) {
        if entry.resolved_at.elapsed() < ttl {
            return Some(entry.addrs.clone());
        }
    }
    // Only drop the entry if it is still expired; a fresh one may have been inserted meanwhile
    entries.remove_if(host, |_, entry| entry.resolved_at.elapsed() >= ttl);
    None
}

async fn resolve_host(
    entries: Arc<DashMap<String, CachedAddrs>>,
    host: String,
    ttl: Duration,
) -> Result<Addrs, BoxError> {
    if let Some(addrs) = lookup_cached(&entries, &host, ttl) {
        return Ok(Box::new(addrs.into_iter()));
    }

    // Port is replaced by the connector
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();
    tracing::debug!(host = %host, count = addrs.len(), "Resolved host");

    if !ttl.is_zero() && !addrs.is_empty() {
        entries.insert(
            host,
            CachedAddrs {
                addrs: addrs.clone(),
                resolved_at: Instant::now(),
            },
        );
    }

    Ok(Box::new(addrs.into_iter()))
}
