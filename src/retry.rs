use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::auth::{Authenticator, BearerToken, TokenCache};
use crate::error::{NatGridError, RequestContext, Result};
use crate::session::{Session, SessionManager};

/// Status codes retried by default
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry policy
/// Immutable once the client is built
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts per request, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any delay before jitter
    pub max_delay: Duration,

    pub exponential_base: f64,

    /// Fraction of the delay randomly added or removed (0.25 = ±25%)
    pub jitter: f64,

    pub retry_on_status: Vec<u16>,
    pub retry_on_connection_errors: bool,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: 0.25,
            retry_on_status: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            retry_on_connection_errors: true,
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Delay after the given failed attempt (1-based), before jitter
    ///
    /// `min(max_delay, initial_delay * exponential_base^(attempt - 1))`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Delay after the given failed attempt, scaled by a random factor in `[1 - jitter, 1 + jitter]`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }

    /// Validate policy values
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(NatGridError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(NatGridError::Config(format!(
                "exponential_base must be >= 1.0, got {}",
                self.exponential_base
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(NatGridError::Config(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(NatGridError::Config(format!(
                "initial_delay ({:?}) cannot exceed max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Whether a request may be safely repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,

    /// Attempted once for retryable failures; a 401 still gets its re-authentication retry
    NonIdempotent,
}

/// Classified result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),

    /// Downstream answered 401
    Unauthorized(NatGridError),

    /// Failure worth retrying after a backoff delay
    Retryable(NatGridError),

    /// Failure raised immediately
    Fatal(NatGridError),
}

/// Everything one attempt needs
#[derive(Clone)]
pub struct AttemptContext {
    pub session: Session,
    pub token: Option<BearerToken>,

    /// 1-based attempt number
    pub attempt: u32,
}

/// Classify an HTTP status that is not a success
pub fn classify_status<T>(
    policy: &RetryPolicy,
    context: &RequestContext,
    attempt: u32,
    status: u16,
    body: String,
) -> AttemptOutcome<T> {
    match status {
        401 => AttemptOutcome::Unauthorized(NatGridError::ClientRequest {
            context: context.clone(),
            attempt,
            status,
            body,
        }),
        s if policy.is_retryable_status(s) => AttemptOutcome::Retryable(NatGridError::TransientServer {
            context: context.clone(),
            attempt,
            status,
            body,
        }),
        _ => AttemptOutcome::Fatal(NatGridError::ClientRequest {
            context: context.clone(),
            attempt,
            status,
            body,
        }),
    }
}

/// Classify a transport error from reqwest
pub fn classify_transport<T>(
    policy: &RetryPolicy,
    context: &RequestContext,
    attempt: u32,
    error: &reqwest::Error,
) -> AttemptOutcome<T> {
    let timed_out = error.is_timeout();
    let connection = error.is_connect() || error.is_request() || error.is_body();

    let err = NatGridError::Connectivity {
        context: context.clone(),
        attempt,
        timed_out,
        message: error.to_string(),
    };

    if (timed_out && policy.retry_on_timeout)
        || (!timed_out && connection && policy.retry_on_connection_errors)
    {
        AttemptOutcome::Retryable(err)
    } else {
        AttemptOutcome::Fatal(err)
    }
}

/// Retry executor
/// Runs one logical request with backoff, jitter and re-authentication on 401
pub struct RetryExecutor {
    policy: RetryPolicy,

    /// Upper bound for a single attempt
    attempt_timeout: Duration,

    sessions: Arc<SessionManager>,
    tokens: Arc<TokenCache>,

    /// None when the client runs without authentication
    authenticator: Option<Arc<Authenticator>>,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        attempt_timeout: Duration,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenCache>,
        authenticator: Option<Arc<Authenticator>>,
    ) -> Self {
        Self {
            policy,
            attempt_timeout,
            sessions,
            tokens,
            authenticator,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn has_authenticator(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Execute `attempt_fn` until it succeeds, fails fatally, or the budget runs out
    pub async fn execute<T, F, Fut>(
        &self,
        context: &RequestContext,
        idempotency: Idempotency,
        attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let span = tracing::info_span!(
            "natgrid_request",
            request_id = %uuid::Uuid::new_v4(),
            method = %context.method,
            url = %context.url,
        );
        self.run(context, idempotency, attempt_fn)
            .instrument(span)
            .await
    }

    async fn run<T, F, Fut>(
        &self,
        context: &RequestContext,
        idempotency: Idempotency,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let mut max_attempts = match idempotency {
            Idempotency::Idempotent => self.policy.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        };
        let mut reauthenticated = false;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let session = self.sessions.get_session().await?;
            let token = self.bearer_token(&session).await?;

            tracing::debug!(attempt, max_attempts, "Executing request attempt");

            let outcome = match tokio::time::timeout(
                self.attempt_timeout,
                attempt_fn(AttemptContext {
                    session,
                    token,
                    attempt,
                }),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => self.attempt_timed_out(context, attempt),
            };

            match outcome {
                AttemptOutcome::Success(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }

                // 401: drop the token and re-authenticate once, outside the attempt budget
                AttemptOutcome::Unauthorized(err) => {
                    log_failure(&err, attempt, max_attempts);
                    if reauthenticated {
                        return Err(err);
                    }
                    reauthenticated = true;
                    max_attempts += 1;
                    self.tokens.invalidate().await;
                    tracing::warn!("Received 401, re-authenticating and retrying...");
                }

                AttemptOutcome::Retryable(err) => {
                    log_failure(&err, attempt, max_attempts);
                    if attempt >= max_attempts {
                        if idempotency == Idempotency::NonIdempotent {
                            return Err(err);
                        }
                        tracing::error!(
                            attempts = attempt,
                            category = err.category(),
                            "Request failed after all retries"
                        );
                        return Err(NatGridError::RetryExhausted {
                            attempts: attempt,
                            last_error: Box::new(err),
                        });
                    }

                    // The re-authentication attempt does not advance the backoff exponent
                    let counted = attempt - u32::from(reauthenticated);
                    let delay = self.policy.jittered_delay(counted);
                    tracing::warn!(
                        "Retrying after {}ms (attempt {}/{})",
                        delay.as_millis(),
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }

                AttemptOutcome::Fatal(err) => {
                    log_failure(&err, attempt, max_attempts);
                    return Err(err);
                }
            }
        }
    }

    /// Token for the next attempt, or None without authentication
    async fn bearer_token(&self, session: &Session) -> Result<Option<BearerToken>> {
        match self.authenticator {
            Some(ref authenticator) => authenticator
                .token(&self.tokens, session.http())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    fn attempt_timed_out<T>(&self, context: &RequestContext, attempt: u32) -> AttemptOutcome<T> {
        let err = NatGridError::Connectivity {
            context: context.clone(),
            attempt,
            timed_out: true,
            message: format!("attempt timed out after {:?}", self.attempt_timeout),
        };
        if self.policy.retry_on_timeout {
            AttemptOutcome::Retryable(err)
        } else {
            AttemptOutcome::Fatal(err)
        }
    }
}

/// Safe summary at warn, full details only at debug
fn log_failure(err: &NatGridError, attempt: u32, max_attempts: u32) {
    tracing::warn!(
        category = err.category(),
        status = err.status(),
        attempt,
        max_attempts,
        "Request attempt failed"
    );
    tracing::debug!(error = %err, "Request failure details");
}
