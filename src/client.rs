// Client facade
// Composes the token cache, session manager and retry executor around GraphQL and REST calls

use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::{Authenticator, CredentialExchange, LoginContext, TokenCache};
use crate::config::ClientConfig;
use crate::error::{preview, NatGridError, RequestContext, Result};
use crate::models::{GraphQlRequest, GraphQlResponse, RestRequest, RestResponse};
use crate::retry::{
    classify_status, classify_transport, AttemptContext, AttemptOutcome, Idempotency,
    RetryExecutor,
};
use crate::session::{SessionManager, SessionSettings};

/// Health-check query
pub const PING_QUERY: &str = "query Ping { __typename }";

/// Decoded response shared by the GraphQL and REST paths
struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    data: Value,
}

/// Authenticated client for the National Grid APIs
///
/// Construction acquires nothing; the HTTP session is created on the first
/// request and the first token is fetched lazily as well.
pub struct NationalGridClient {
    config: Arc<ClientConfig>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenCache>,
    login: Arc<RwLock<LoginContext>>,
    executor: RetryExecutor,
}

impl NationalGridClient {
    /// Client without authentication
    ///
    /// Fails if credentials are configured, since nothing could exchange them.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.has_credentials() {
            return Err(NatGridError::Config(
                "credentials are configured but no credential exchange was supplied".to_string(),
            ));
        }
        Self::build(config, None)
    }

    /// Client that authenticates through `exchange`
    pub fn with_exchange(config: ClientConfig, exchange: Arc<dyn CredentialExchange>) -> Result<Self> {
        Self::build(config, Some(exchange))
    }

    fn build(config: ClientConfig, exchange: Option<Arc<dyn CredentialExchange>>) -> Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionManager::new(SessionSettings::from(&config)));
        let tokens = Arc::new(TokenCache::new(config.token_refresh_buffer));
        let login = Arc::new(RwLock::new(LoginContext::default()));

        let authenticator = exchange.map(|exchange| {
            Arc::new(Authenticator::new(
                exchange,
                config.username.clone().unwrap_or_default(),
                config.password.clone().unwrap_or_default(),
                config.timeout,
                Arc::clone(&login),
            ))
        });

        let executor = RetryExecutor::new(
            config.retry.clone(),
            config.timeout,
            Arc::clone(&sessions),
            Arc::clone(&tokens),
            authenticator,
        );

        tracing::debug!(
            endpoint = %config.endpoint,
            rest_base_url = %config.rest_base_url,
            authenticated = executor.has_authenticator(),
            "Created National Grid client"
        );

        Ok(Self {
            config: Arc::new(config),
            sessions,
            tokens,
            login,
            executor,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Snapshot of values captured during login
    pub async fn login_context(&self) -> LoginContext {
        self.login.read().await.clone()
    }

    /// Execute a GraphQL request
    ///
    /// Application-level errors in the response envelope are returned as data;
    /// call [`GraphQlResponse::raise_on_errors`] to turn them into an error.
    pub async fn execute_graphql(&self, request: &GraphQlRequest) -> Result<GraphQlResponse> {
        let url = request
            .endpoint
            .clone()
            .unwrap_or_else(|| self.config.endpoint.clone());
        let host = host_key(&url)?;
        let context = RequestContext::new("POST", url.clone())
            .with_operation(request.operation_label())
            .with_payload_summary(request.payload_summary());
        let idempotency = if request.is_mutation() {
            Idempotency::NonIdempotent
        } else {
            Idempotency::Idempotent
        };
        let payload = request.to_payload();

        tracing::debug!(operation = %request.operation_label(), "POST {}", url);

        let (url, host, context, payload) = (&url, &host, &context, &payload);
        let raw = self
            .executor
            .execute(context, idempotency, move |attempt| {
                let headers = self.config.build_headers(
                    &request.headers,
                    attempt.token.as_ref(),
                    Some("application/json"),
                );
                async move {
                    let headers = match headers {
                        Ok(headers) => headers,
                        Err(e) => return AttemptOutcome::Fatal(e),
                    };
                    let builder = attempt
                        .session
                        .http()
                        .post(url.as_str())
                        .headers(headers)
                        .json(payload);
                    self.dispatch(&attempt, context, host, builder).await
                }
            })
            .await?;

        let response = GraphQlResponse::from_payload(raw.data)?;
        if response.has_errors() {
            tracing::warn!(
                count = response.error_count(),
                codes = ?response.error_codes(),
                operation = %request.operation_label(),
                "GraphQL errors returned"
            );
            tracing::debug!(errors = ?response.errors, "GraphQL error details");
        }

        Ok(response)
    }

    /// Execute a REST request against the REST base URL
    pub async fn execute_rest(&self, request: &RestRequest) -> Result<RestResponse> {
        let url = request.resolve_url(&self.config.rest_base_url);
        let host = host_key(&url)?;
        let mut context = RequestContext::new(request.method.as_str(), url.clone())
            .with_operation(request.path_or_url.clone());
        if let Some(summary) = request.payload_summary() {
            context = context.with_payload_summary(summary);
        }
        let idempotency = if request.is_idempotent() {
            Idempotency::Idempotent
        } else {
            Idempotency::NonIdempotent
        };
        let content_type = request.json.as_ref().map(|_| "application/json");

        tracing::debug!("{} {}", request.method, url);

        let (url, host, context) = (&url, &host, &context);
        let raw = self
            .executor
            .execute(context, idempotency, move |attempt| {
                let headers =
                    self.config
                        .build_headers(&request.headers, attempt.token.as_ref(), content_type);
                async move {
                    let headers = match headers {
                        Ok(headers) => headers,
                        Err(e) => return AttemptOutcome::Fatal(e),
                    };
                    let mut builder = attempt
                        .session
                        .http()
                        .request(request.method.clone(), url.as_str())
                        .headers(headers)
                        .query(&request.params);
                    if let Some(ref json) = request.json {
                        builder = builder.json(json);
                    }
                    self.dispatch(&attempt, context, host, builder).await
                }
            })
            .await?;

        Ok(RestResponse {
            status: raw.status,
            headers: raw.headers,
            data: raw.data,
        })
    }

    /// Check that the GraphQL endpoint answers with data
    pub async fn ping(&self) -> Result<bool> {
        let response = self.execute_graphql(&GraphQlRequest::new(PING_QUERY)).await?;
        Ok(response.data.is_some())
    }

    /// Close the HTTP session; a later request opens a new one
    pub async fn close(&self) {
        self.sessions.close().await;
        tracing::debug!("Closed National Grid client session");
    }

    /// Send one attempt and classify the result
    async fn dispatch(
        &self,
        attempt: &AttemptContext,
        context: &RequestContext,
        host: &str,
        builder: RequestBuilder,
    ) -> AttemptOutcome<RawResponse> {
        let policy = self.executor.policy();

        // Holds the connection slots until the body is read
        let _permit = match attempt.session.acquire(host).await {
            Some(permit) => permit,
            None => {
                let err = NatGridError::Connectivity {
                    context: context.clone(),
                    attempt: attempt.attempt,
                    timed_out: false,
                    message: "session closed".to_string(),
                };
                return if policy.retry_on_connection_errors {
                    AttemptOutcome::Retryable(err)
                } else {
                    AttemptOutcome::Fatal(err)
                };
            }
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport(policy, context, attempt.attempt, &e),
        };

        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return classify_transport(policy, context, attempt.attempt, &e),
        };

        if !(200..300).contains(&status) {
            tracing::debug!(status, body = %preview(&body), "Non-success response");
            return classify_status(policy, context, attempt.attempt, status, body);
        }

        match parse_body(&body) {
            Ok(data) => AttemptOutcome::Success(RawResponse {
                status,
                headers,
                data,
            }),
            Err(e) => {
                tracing::debug!(body = %preview(&body), "Undecodable response body");
                AttemptOutcome::Fatal(e)
            }
        }
    }
}

/// Connection pool key for a URL: `host:port`
fn host_key(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| NatGridError::Config(format!("invalid URL '{}': {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| NatGridError::Config(format!("URL has no host: '{}'", url)))?;
    Ok(match parsed.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Response headers as a plain map; non-UTF-8 values are dropped
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Decode a JSON body; an empty body is `Null`
fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| NatGridError::DataShape {
        path: "$".to_string(),
        expected: "JSON document".to_string(),
        observed: format!("undecodable body ({})", e),
    })
}
