// Authentication types

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Login context key for the verified subject identifier
pub const SUBJECT_KEY: &str = "sub";

/// Opaque bearer token presented on downstream calls
///
/// `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// Raw token value
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Result of a successful credential exchange
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangedToken {
    pub access_token: String,

    /// Token lifetime in seconds from issuance
    pub expires_in: u64,

    /// Verified subject identifier, when the identity provider supplied one
    pub subject: Option<String>,
}

impl ExchangedToken {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Debug for ExchangedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangedToken")
            .field("access_token", &"***")
            .field("expires_in", &self.expires_in)
            .field("subject", &self.subject)
            .finish()
    }
}

/// Session metadata accumulated from credential exchanges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginContext {
    values: HashMap<String, String>,
}

impl LoginContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Verified subject identifier of the logged-in user
    pub fn subject(&self) -> Option<&str> {
        self.get(SUBJECT_KEY)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}
