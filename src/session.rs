// Session management
// Owns the shared HTTP transport and recreates it once closed

use anyhow::Context;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::config::ClientConfig;
use crate::dns::CachingResolver;
use crate::error::Result;

/// Transport limits applied to every session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Total concurrent connections across all hosts
    pub connection_limit: usize,

    /// Concurrent connections to a single host
    pub connection_limit_per_host: usize,

    /// How long resolved addresses are reused
    pub dns_cache_ttl: Duration,

    /// Per-request timeout
    pub timeout: Duration,

    pub verify_ssl: bool,
}

impl From<&ClientConfig> for SessionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connection_limit: config.connection_limit,
            connection_limit_per_host: config.connection_limit_per_host,
            dns_cache_ttl: config.dns_cache_ttl,
            timeout: config.timeout,
            verify_ssl: config.verify_ssl,
        }
    }
}

struct SessionInner {
    http: Client,
    generation: u64,
    closed: AtomicBool,
    total: Arc<Semaphore>,
    per_host: DashMap<String, Arc<Semaphore>>,
    per_host_limit: usize,
}

/// Handle to the pooled transport
///
/// Cheap to clone; all clones observe the same closed state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Connection slots held for the duration of one attempt
pub struct ConnectionPermit {
    _total: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

impl Session {
    fn build(settings: &SessionSettings, generation: u64) -> Result<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(settings.connection_limit_per_host)
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .dns_resolver(Arc::new(CachingResolver::new(settings.dns_cache_ttl)))
            .cookie_store(true)
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .user_agent(concat!("natgrid-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                http,
                generation,
                closed: AtomicBool::new(false),
                total: Arc::new(Semaphore::new(settings.connection_limit)),
                per_host: DashMap::new(),
                per_host_limit: settings.connection_limit_per_host,
            }),
        })
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Sequence number of this session, starting at 1
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait for a connection slot towards `host`
    /// Returns None once the session is closed
    pub async fn acquire(&self, host: &str) -> Option<ConnectionPermit> {
        if self.is_closed() {
            return None;
        }

        // Host slot first, so a caller queued behind a busy host holds no total slot
        let host_pool = self
            .inner
            .per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.inner.per_host_limit)))
            .value()
            .clone();
        let host = host_pool.acquire_owned().await.ok()?;
        let total = Arc::clone(&self.inner.total).acquire_owned().await.ok()?;

        // close() may have run after the check above, before this host's pool existed
        if self.is_closed() {
            return None;
        }

        Some(ConnectionPermit {
            _total: total,
            _host: host,
        })
    }

    /// Mark the session closed and refuse further connection slots
    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.total.close();
        for pool in self.inner.per_host.iter() {
            pool.value().close();
        }
    }
}

/// Session manager
/// Keeps at most one live session and builds a new one when the current is closed
pub struct SessionManager {
    current: RwLock<Option<Session>>,
    create_lock: Mutex<()>,
    settings: SessionSettings,
    generations: AtomicU64,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            current: RwLock::new(None),
            create_lock: Mutex::new(()),
            settings,
            generations: AtomicU64::new(0),
        }
    }

    /// Current session if it is still open
    async fn open_session(&self) -> Option<Session> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|session| !session.is_closed())
            .cloned()
    }

    /// Get the live session, creating it on first use or after closure
    pub async fn get_session(&self) -> Result<Session> {
        if let Some(session) = self.open_session().await {
            return Ok(session);
        }

        let _guard = self.create_lock.lock().await;

        if let Some(session) = self.open_session().await {
            return Ok(session);
        }

        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Session::build(&self.settings, generation)?;
        *self.current.write().await = Some(session.clone());

        tracing::debug!(
            generation,
            connection_limit = self.settings.connection_limit,
            connection_limit_per_host = self.settings.connection_limit_per_host,
            "Created HTTP session"
        );

        Ok(session)
    }

    /// Close the current session; the next request creates a new one
    pub async fn close(&self) {
        let session = self.current.write().await.take();
        if let Some(session) = session {
            session.close();
            tracing::debug!(generation = session.generation(), "Closed HTTP session");
        }
    }

    /// Generation of the live session, if one is open
    pub async fn current_generation(&self) -> Option<u64> {
        self.open_session().await.map(|session| session.generation())
    }

    /// Number of sessions created so far
    pub fn sessions_created(&self) -> u64 {
        self.generations.load(Ordering::Acquire)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(session) = self.current.get_mut().take() {
            session.close();
        }
    }
}
