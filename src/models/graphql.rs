use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{NatGridError, Result};

// ==================================================================================================
// Request
// ==================================================================================================

/// A reusable GraphQL request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// Overrides the client's default endpoint for this request
    #[serde(skip)]
    pub endpoint: Option<String>,

    /// Extra headers, applied after the client defaults
    #[serde(skip)]
    pub headers: Vec<(String, String)>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON body sent to the endpoint
    ///
    /// The query is trimmed; empty variables and operation name are omitted.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("query".to_string(), Value::String(self.query.trim().to_string()));
        if let Some(ref variables) = self.variables {
            if !variables.is_empty() {
                payload.insert("variables".to_string(), Value::Object(variables.clone()));
            }
        }
        if let Some(ref name) = self.operation_name {
            if !name.is_empty() {
                payload.insert("operationName".to_string(), Value::String(name.clone()));
            }
        }
        Value::Object(payload)
    }

    /// Document text from the first line that is not blank or a `#` comment
    fn document_start(&self) -> &str {
        let mut rest = self.query.as_str();
        loop {
            let trimmed = rest.trim_start();
            if !trimmed.starts_with('#') {
                return trimmed;
            }
            rest = match trimmed.find('\n') {
                Some(end) => &trimmed[end + 1..],
                None => "",
            };
        }
    }

    /// Whether the document starts with a mutation
    pub fn is_mutation(&self) -> bool {
        self.document_start()
            .split(|c: char| c.is_whitespace() || c == '{' || c == '(')
            .next()
            .map(|keyword| keyword == "mutation")
            .unwrap_or(false)
    }

    /// Label used in logs and error context
    pub fn operation_label(&self) -> String {
        if let Some(ref name) = self.operation_name {
            return name.clone();
        }
        // Fall back to `query Name` / `mutation Name`
        let mut words = self.document_start().split_whitespace();
        let name = match words.next() {
            Some("query" | "mutation" | "subscription") => words
                .next()
                .and_then(|word| word.split(|c: char| c == '(' || c == '{').next()),
            _ => None,
        };
        name.filter(|name| !name.is_empty())
            .unwrap_or("anonymous")
            .to_string()
    }

    /// Non-sensitive summary: variable names only, never values
    pub fn payload_summary(&self) -> String {
        match self.variables {
            Some(ref variables) if !variables.is_empty() => {
                let names: Vec<&str> = variables.keys().map(String::as_str).collect();
                format!("variables: {}", names.join(", "))
            }
            _ => "no variables".to_string(),
        }
    }
}

// ==================================================================================================
// Response
// ==================================================================================================

/// Normalized GraphQL response envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub errors: Option<Vec<Value>>,

    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphQlResponse {
    /// Build from a decoded body; the top level must be an object
    pub fn from_payload(payload: Value) -> Result<Self> {
        match payload {
            Value::Object(mut map) => Ok(Self {
                data: map.remove("data").filter(|v| !v.is_null()),
                errors: match map.remove("errors") {
                    None | Some(Value::Null) => None,
                    Some(Value::Array(errors)) => Some(errors),
                    Some(other) => {
                        return Err(NatGridError::DataShape {
                            path: "errors".to_string(),
                            expected: "array".to_string(),
                            observed: crate::extract::describe(&other).to_string(),
                        })
                    }
                },
                extensions: map.remove("extensions").filter(|v| !v.is_null()),
            }),
            other => Err(NatGridError::DataShape {
                path: "$".to_string(),
                expected: "object".to_string(),
                observed: crate::extract::describe(&other).to_string(),
            }),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|errors| !errors.is_empty())
    }

    pub fn error_count(&self) -> usize {
        self.errors.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// `extensions.code` of each error that carries one
    pub fn error_codes(&self) -> Vec<String> {
        self.errors
            .iter()
            .flatten()
            .filter_map(|error| error.pointer("/extensions/code"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Turn application-level errors into a [`NatGridError::GraphQl`]
    pub fn raise_on_errors(&self) -> Result<()> {
        if !self.has_errors() {
            return Ok(());
        }
        Err(NatGridError::GraphQl {
            count: self.error_count(),
            codes: self.error_codes(),
        })
    }
}
