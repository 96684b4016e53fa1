// Credential exchange
// Turns user credentials into a bearer token via an external identity provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;

use super::cache::TokenCache;
use super::types::{BearerToken, ExchangedToken, LoginContext, SUBJECT_KEY};
use crate::error::{NatGridError, Result};

/// Identity-provider interaction that converts credentials into a bearer token
///
/// Implementations run on the shared transport so cookies and pooled
/// connections are reused. Failures should be reported as
/// [`NatGridError::Authentication`].
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(
        &self,
        http: &Client,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<ExchangedToken>;
}

/// Exchange that hands out a pre-issued token
pub struct StaticTokenExchange {
    token: ExchangedToken,
}

impl StaticTokenExchange {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            token: ExchangedToken::new(access_token, expires_in),
        }
    }
}

#[async_trait]
impl CredentialExchange for StaticTokenExchange {
    async fn exchange(
        &self,
        _http: &Client,
        _username: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<ExchangedToken> {
        Ok(self.token.clone())
    }
}

/// Credentials plus the exchange that authenticates them
pub struct Authenticator {
    exchange: Arc<dyn CredentialExchange>,
    username: String,
    password: String,
    timeout: Duration,
    login: Arc<RwLock<LoginContext>>,
}

impl Authenticator {
    pub fn new(
        exchange: Arc<dyn CredentialExchange>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
        login: Arc<RwLock<LoginContext>>,
    ) -> Self {
        Self {
            exchange,
            username: username.into(),
            password: password.into(),
            timeout,
            login,
        }
    }

    /// Get a valid token from the cache, authenticating if it is stale
    pub async fn token(&self, cache: &TokenCache, http: &Client) -> Result<BearerToken> {
        cache.get_valid_token(|| self.authenticate(http)).await
    }

    /// Run one credential exchange, bounded by the configured timeout
    async fn authenticate(&self, http: &Client) -> Result<ExchangedToken> {
        tracing::info!("Authenticating via credential exchange...");

        let exchanged = tokio::time::timeout(
            self.timeout,
            self.exchange
                .exchange(http, &self.username, &self.password, self.timeout),
        )
        .await
        .map_err(|_| {
            NatGridError::Authentication(format!(
                "credential exchange timed out after {:?}",
                self.timeout
            ))
        })??;

        if exchanged.access_token.is_empty() {
            return Err(NatGridError::Authentication(
                "credential exchange returned an empty access token".to_string(),
            ));
        }

        if let Some(ref subject) = exchanged.subject {
            self.login.write().await.insert(SUBJECT_KEY, subject.clone());
            tracing::debug!("Recorded subject from credential exchange");
        }

        Ok(exchanged)
    }
}
