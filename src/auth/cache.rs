use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tokio::sync::{Mutex, RwLock};

use super::types::{BearerToken, ExchangedToken};
use crate::error::Result;

/// Upper bound for the refresh buffer, longer than any accepted token lifetime
const MAX_BUFFER_DAYS: i64 = 150 * 365;

/// Cached token with its absolute expiry
struct CachedToken {
    token: BearerToken,
    expires_at: DateTime<Utc>,
}

/// Token cache
/// Holds the current bearer token and refreshes it with at most one exchange in flight
pub struct TokenCache {
    /// Current token, read on every request
    current: RwLock<Option<CachedToken>>,

    /// Exclusive section around credential exchanges
    refresh_lock: Mutex<()>,

    /// Tokens are treated as stale this long before they expire
    refresh_buffer: Duration,
}

impl TokenCache {
    /// Create an empty cache with the given safety buffer
    pub fn new(refresh_buffer: std::time::Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            // Saturate beyond any token lifetime so an oversized buffer means "always stale"
            refresh_buffer: Duration::from_std(refresh_buffer)
                .unwrap_or_else(|_| Duration::days(MAX_BUFFER_DAYS))
                .min(Duration::days(MAX_BUFFER_DAYS)),
        }
    }

    /// Check whether a token expiring at `expires_at` is still usable at `now`
    fn is_fresh(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expires_at
            .checked_sub_signed(self.refresh_buffer)
            .is_some_and(|deadline| now < deadline)
    }

    /// Return the cached token if it is outside the refresh buffer
    async fn fresh_token(&self) -> Option<BearerToken> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|cached| self.is_fresh(cached.expires_at, Utc::now()))
            .map(|cached| cached.token.clone())
    }

    /// Get a valid token, running `exchange` if the cached one is missing or stale
    ///
    /// Concurrent callers that find the token stale queue on the refresh lock;
    /// the first one runs the exchange and the rest reuse its result.
    pub async fn get_valid_token<F, Fut>(&self, exchange: F) -> Result<BearerToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExchangedToken>>,
    {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.fresh_token().await {
            tracing::debug!("Token refreshed by a concurrent caller");
            return Ok(token);
        }

        tracing::debug!("Refreshing access token...");
        let exchanged = match exchange().await {
            Ok(exchanged) => exchanged,
            Err(e) => {
                tracing::error!(category = e.category(), "Token refresh failed");
                *self.current.write().await = None;
                return Err(e);
            }
        };

        // Clamped so absurd lifetimes cannot overflow the expiry computation
        let lifetime = exchanged.expires_in.min(u32::MAX as u64) as i64;
        let expires_at = Utc::now() + Duration::seconds(lifetime);
        let token = BearerToken::new(exchanged.access_token);

        *self.current.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        tracing::info!(
            "Access token refreshed, expires: {}",
            expires_at.to_rfc3339()
        );

        Ok(token)
    }

    /// Drop the cached token so the next request re-authenticates
    pub async fn invalidate(&self) {
        let mut current = self.current.write().await;
        if current.take().is_some() {
            tracing::debug!("Cached access token invalidated");
        }
    }

    /// Check if a token is cached and outside the refresh buffer
    pub async fn is_valid(&self) -> bool {
        self.fresh_token().await.is_some()
    }

    /// Expiry of the cached token, if any
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.read().await.as_ref().map(|cached| cached.expires_at)
    }
}
