// Error handling module
// Defines the client error taxonomy and the request context attached to failures

use std::fmt;

use thiserror::Error;

/// Maximum number of characters of a response body kept in error messages
pub const BODY_PREVIEW_LIMIT: usize = 500;

/// Describes the logical request a failure belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// HTTP method (GET, POST, ...)
    pub method: String,

    /// Fully resolved request URL
    pub url: String,

    /// GraphQL operation name or REST path label
    pub operation: Option<String>,

    /// Short, non-sensitive description of the request payload
    pub payload_summary: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            operation: None,
            payload_summary: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_payload_summary(mut self, summary: impl Into<String>) -> Self {
        self.payload_summary = Some(summary.into());
        self
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        if let Some(ref operation) = self.operation {
            write!(f, " [{}]", operation)?;
        }
        if let Some(ref summary) = self.payload_summary {
            write!(f, " payload: {}", summary)?;
        }
        Ok(())
    }
}

/// Errors surfaced by the client
#[derive(Error, Debug)]
pub enum NatGridError {
    /// Transport unreachable, DNS failure, connect failure or timeout
    #[error("Connection failed: {context} (attempt {attempt}): {message}")]
    Connectivity {
        context: RequestContext,
        attempt: u32,
        timed_out: bool,
        message: String,
    },

    /// Credential exchange rejected the credentials or could not be completed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Status code from the configured retryable set
    #[error("Server error {status}: {context} (attempt {attempt}): {}", preview(.body))]
    TransientServer {
        context: RequestContext,
        attempt: u32,
        status: u16,
        body: String,
    },

    /// Non-retryable status: other 4xx, 5xx outside the retryable set, or a repeated 401
    #[error("Request rejected with {status}: {context} (attempt {attempt}): {}", preview(.body))]
    ClientRequest {
        context: RequestContext,
        attempt: u32,
        status: u16,
        body: String,
    },

    /// Retryable failures persisted past the attempt budget
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<NatGridError>,
    },

    /// Payload does not match the shape a typed extraction expects
    #[error("Unexpected response shape at '{path}': expected {expected}, found {observed}")]
    DataShape {
        path: String,
        expected: String,
        observed: String,
    },

    /// GraphQL application-level errors returned inside a successful response
    #[error("GraphQL errors returned: {count} error(s) [{}]", .codes.join(", "))]
    GraphQl { count: usize, codes: Vec<String> },

    /// Invalid configuration or request parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NatGridError {
    /// Stable short label, safe to log at any level
    pub fn category(&self) -> &'static str {
        match self {
            NatGridError::Connectivity { timed_out: true, .. } => "timeout",
            NatGridError::Connectivity { .. } => "connectivity",
            NatGridError::Authentication(_) => "authentication",
            NatGridError::TransientServer { .. } => "transient_server",
            NatGridError::ClientRequest { status: 401, .. } => "unauthorized",
            NatGridError::ClientRequest { .. } => "client_request",
            NatGridError::RetryExhausted { .. } => "retry_exhausted",
            NatGridError::DataShape { .. } => "data_shape",
            NatGridError::GraphQl { .. } => "graphql",
            NatGridError::Config(_) => "config",
            NatGridError::Internal(_) => "internal",
        }
    }

    /// HTTP status attached to this failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NatGridError::TransientServer { status, .. }
            | NatGridError::ClientRequest { status, .. } => Some(*status),
            NatGridError::RetryExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Attempt number the failure was observed on
    pub fn attempt(&self) -> Option<u32> {
        match self {
            NatGridError::Connectivity { attempt, .. }
            | NatGridError::TransientServer { attempt, .. }
            | NatGridError::ClientRequest { attempt, .. } => Some(*attempt),
            NatGridError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Request context attached to this failure, if any
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            NatGridError::Connectivity { context, .. }
            | NatGridError::TransientServer { context, .. }
            | NatGridError::ClientRequest { context, .. } => Some(context),
            NatGridError::RetryExhausted { last_error, .. } => last_error.context(),
            _ => None,
        }
    }
}

/// Truncate a response body for inclusion in error messages
pub fn preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_LIMIT {
        return body.to_string();
    }
    let truncated: String = body.chars().take(BODY_PREVIEW_LIMIT).collect();
    format!("{}...", truncated)
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, NatGridError>;
