use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{NatGridError, Result};

/// A REST call relative to the configured base URL
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,

    /// Path joined onto the base URL, or an absolute `http(s)://` URL
    pub path_or_url: String,

    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method, path_or_url: impl Into<String>) -> Self {
        Self {
            method,
            path_or_url: path_or_url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn get(path_or_url: impl Into<String>) -> Self {
        Self::new(Method::GET, path_or_url)
    }

    pub fn post(path_or_url: impl Into<String>) -> Self {
        Self::new(Method::POST, path_or_url)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| NatGridError::Config(format!("request body is not serializable: {}", e)))?;
        self.json = Some(value);
        Ok(self)
    }

    /// Absolute URL for this request
    pub fn resolve_url(&self, base_url: &str) -> String {
        if self.path_or_url.starts_with("http://") || self.path_or_url.starts_with("https://") {
            return self.path_or_url.clone();
        }
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path_or_url.trim_start_matches('/')
        )
    }

    /// Safe to repeat without side effects
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
        )
    }

    /// Non-sensitive summary: parameter names and whether a body is attached
    pub fn payload_summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.params.is_empty() {
            let names: Vec<&str> = self.params.iter().map(|(k, _)| k.as_str()).collect();
            parts.push(format!("params: {}", names.join(", ")));
        }
        if self.json.is_some() {
            parts.push("json body".to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Normalized REST response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,

    /// Decoded JSON body; `Null` when the body is empty
    pub data: Value,
}
