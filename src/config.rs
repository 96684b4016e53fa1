use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::BearerToken;
use crate::error::{NatGridError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "https://myaccount.nationalgrid.com/api/user-cu-uwp-gql";
pub const DEFAULT_REST_BASE_URL: &str = "https://myaccount.nationalgrid.com/api";
pub const DEFAULT_SUBSCRIPTION_KEY: &str = "e674f89d7ed9417194de894b701333dd";
pub const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";

/// National Grid client - diagnostic CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Account username (email)
    #[arg(short, long, env = "NATGRID_USERNAME")]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "NATGRID_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Pre-issued bearer token used instead of a credential exchange
    #[arg(long, env = "NATGRID_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Default GraphQL endpoint
    #[arg(long, env = "NATGRID_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "NATGRID_TIMEOUT")]
    pub timeout: Option<f64>,

    /// Maximum attempts per request (including the first)
    #[arg(long, env = "NATGRID_RETRY_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check that the GraphQL endpoint answers
    Ping,

    /// Run a GraphQL query
    Graphql {
        #[arg(long)]
        query: String,

        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        #[arg(long)]
        operation_name: Option<String>,

        /// Endpoint override for this query
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Call a REST endpoint
    Rest {
        /// Path relative to the REST base URL, or an absolute URL
        #[arg(long)]
        path: String,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Query parameter as KEY=VALUE (repeatable)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
}

/// Client configuration, immutable for the lifetime of a client
#[derive(Clone)]
pub struct ClientConfig {
    // Endpoints
    pub endpoint: String,
    pub rest_base_url: String,

    // Credentials
    pub username: Option<String>,
    pub password: Option<String>,

    // Headers
    pub subscription_key: String,
    pub default_headers: Vec<(String, String)>,

    // Transport
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub connection_limit: usize,
    pub connection_limit_per_host: usize,
    pub dns_cache_ttl: Duration,

    // Token lifecycle
    pub token_refresh_buffer: Duration,

    // Retry
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            username: None,
            password: None,
            subscription_key: DEFAULT_SUBSCRIPTION_KEY.to_string(),
            default_headers: Vec::new(),
            timeout: Duration::from_secs(30),
            verify_ssl: true,
            connection_limit: 100,
            connection_limit_per_host: 30,
            dns_cache_ttl: Duration::from_secs(300),
            token_refresh_buffer: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("rest_base_url", &self.rest_base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("subscription_key", &self.subscription_key)
            .field("default_headers", &self.default_headers)
            .field("timeout", &self.timeout)
            .field("verify_ssl", &self.verify_ssl)
            .field("connection_limit", &self.connection_limit)
            .field("connection_limit_per_host", &self.connection_limit_per_host)
            .field("dns_cache_ttl", &self.dns_cache_ttl)
            .field("token_refresh_buffer", &self.token_refresh_buffer)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_subscription_key(mut self, key: impl Into<String>) -> Self {
        self.subscription_key = key.into();
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_token_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.token_refresh_buffer = buffer;
        self
    }

    pub fn with_connection_limits(mut self, total: usize, per_host: usize) -> Self {
        self.connection_limit = total;
        self.connection_limit_per_host = per_host;
        self
    }

    /// Load configuration from the environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let retry_defaults = defaults.retry.clone();

        let parse = |key: &str| -> Option<String> { lookup(key).filter(|v| !v.trim().is_empty()) };

        let config = Self {
            endpoint: parse("NATGRID_ENDPOINT").unwrap_or(defaults.endpoint),
            rest_base_url: parse("NATGRID_REST_BASE_URL").unwrap_or(defaults.rest_base_url),
            username: parse("NATGRID_USERNAME"),
            password: parse("NATGRID_PASSWORD"),
            subscription_key: parse("NATGRID_SUBSCRIPTION_KEY")
                .unwrap_or(defaults.subscription_key),
            default_headers: defaults.default_headers,

            timeout: parse_value::<f64>(&parse, "NATGRID_TIMEOUT")?
                .map(duration_from_secs)
                .transpose()?
                .unwrap_or(defaults.timeout),
            verify_ssl: parse_value(&parse, "NATGRID_VERIFY_SSL")?.unwrap_or(defaults.verify_ssl),
            connection_limit: parse_value(&parse, "NATGRID_CONNECTION_LIMIT")?
                .unwrap_or(defaults.connection_limit),
            connection_limit_per_host: parse_value(&parse, "NATGRID_CONNECTION_LIMIT_PER_HOST")?
                .unwrap_or(defaults.connection_limit_per_host),
            dns_cache_ttl: parse_value(&parse, "NATGRID_DNS_CACHE_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.dns_cache_ttl),
            token_refresh_buffer: parse_value(&parse, "NATGRID_TOKEN_REFRESH_BUFFER")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_refresh_buffer),

            retry: RetryPolicy {
                max_attempts: parse_value(&parse, "NATGRID_RETRY_MAX_ATTEMPTS")?
                    .unwrap_or(retry_defaults.max_attempts),
                initial_delay: parse_value::<f64>(&parse, "NATGRID_RETRY_INITIAL_DELAY")?
                    .map(duration_from_secs)
                    .transpose()?
                    .unwrap_or(retry_defaults.initial_delay),
                max_delay: parse_value::<f64>(&parse, "NATGRID_RETRY_MAX_DELAY")?
                    .map(duration_from_secs)
                    .transpose()?
                    .unwrap_or(retry_defaults.max_delay),
                exponential_base: parse_value(&parse, "NATGRID_RETRY_EXPONENTIAL_BASE")?
                    .unwrap_or(retry_defaults.exponential_base),
                jitter: parse_value(&parse, "NATGRID_RETRY_JITTER")?
                    .unwrap_or(retry_defaults.jitter),
                retry_on_status: match parse("NATGRID_RETRY_STATUSES") {
                    Some(list) => parse_status_list(&list)?,
                    None => retry_defaults.retry_on_status,
                },
                retry_on_connection_errors: retry_defaults.retry_on_connection_errors,
                retry_on_timeout: retry_defaults.retry_on_timeout,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides on top of the environment configuration
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(ref endpoint) = args.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(ref username) = args.username {
            config.username = Some(username.clone());
        }
        if let Some(ref password) = args.password {
            config.password = Some(password.clone());
        }
        if let Some(timeout) = args.timeout {
            config.timeout = duration_from_secs(timeout)?;
        }
        if let Some(max_attempts) = args.max_attempts {
            config.retry.max_attempts = max_attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.endpoint)
            .map_err(|e| NatGridError::Config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;
        reqwest::Url::parse(&self.rest_base_url).map_err(|e| {
            NatGridError::Config(format!(
                "invalid REST base URL '{}': {}",
                self.rest_base_url, e
            ))
        })?;

        if self.username.is_some() != self.password.is_some() {
            return Err(NatGridError::Config(
                "username and password must be provided together".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(NatGridError::Config("timeout must be positive".to_string()));
        }
        if self.connection_limit == 0 || self.connection_limit_per_host == 0 {
            return Err(NatGridError::Config(
                "connection limits must be at least 1".to_string(),
            ));
        }

        self.retry.validate()
    }

    /// Check whether credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Combine fixed headers, authentication and per-request overrides
    pub fn build_headers(
        &self,
        extra: &[(String, String)],
        token: Option<&BearerToken>,
        content_type: Option<&str>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }
        if let Some(token) = token {
            let mut value = header_value(&token.header_value())?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if !self.subscription_key.is_empty() {
            headers.insert(SUBSCRIPTION_KEY_HEADER, header_value(&self.subscription_key)?);
        }

        for (name, value) in self.default_headers.iter().chain(extra.iter()) {
            let name = HeaderName::from_str(name)
                .map_err(|e| NatGridError::Config(format!("invalid header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| NatGridError::Config("header value contains invalid characters".to_string()))
}

fn duration_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| NatGridError::Config(format!("invalid duration: {}", secs)))
}

/// Parse an optional variable, reporting malformed values instead of ignoring them
fn parse_value<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| NatGridError::Config(format!("{} has an invalid value: '{}'", key, raw))),
    }
}

/// Parse a comma-separated list of HTTP status codes
fn parse_status_list(list: &str) -> Result<Vec<u16>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|_| NatGridError::Config(format!("invalid status code: '{}'", s)))
        })
        .collect()
}

/// Parse KEY=VALUE pairs for CLI parameters
fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}
