// Typed extraction from response payloads
// Missing or mistyped fields are reported as DataShape errors, never defaulted

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{NatGridError, Result};
use crate::models::{GraphQlResponse, RestResponse};

/// JSON type name used in error messages
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk a dot-separated path (`user.accountLinks.nodes`) from `root`
///
/// Array elements are addressed by index (`nodes.0.id`). A null or missing
/// field anywhere along the path is an error.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Result<&'a Value> {
    let mut current = root;
    let mut walked = String::new();

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);

        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => {
                return Err(NatGridError::DataShape {
                    path: walked,
                    expected: "object".to_string(),
                    observed: describe(other).to_string(),
                })
            }
        };

        current = match next {
            Some(Value::Null) | None => {
                return Err(NatGridError::DataShape {
                    path: walked,
                    expected: "value".to_string(),
                    observed: if next.is_some() { "null" } else { "missing" }.to_string(),
                })
            }
            Some(value) => value,
        };
    }

    Ok(current)
}

/// Deserialize the value at `path` into `T`
pub fn extract<T: DeserializeOwned>(root: &Value, path: &str) -> Result<T> {
    let value = value_at(root, path)?;
    serde_json::from_value(value.clone()).map_err(|e| NatGridError::DataShape {
        path: path.to_string(),
        expected: std::any::type_name::<T>().to_string(),
        observed: format!("{} ({})", describe(value), e),
    })
}

/// Extract from the `data` member of a GraphQL response
///
/// Application errors are raised first so a null `data` caused by an error
/// surfaces as the GraphQL error rather than a shape mismatch.
pub fn graphql_data<T: DeserializeOwned>(response: &GraphQlResponse, path: &str) -> Result<T> {
    response.raise_on_errors()?;
    let data = response.data.as_ref().ok_or_else(|| NatGridError::DataShape {
        path: "data".to_string(),
        expected: "object".to_string(),
        observed: "null".to_string(),
    })?;
    extract(data, path)
}

/// Extract `nodes` from a GraphQL connection at `path`
pub fn graphql_nodes<T: DeserializeOwned>(response: &GraphQlResponse, path: &str) -> Result<Vec<T>> {
    graphql_data(response, &format!("{}.nodes", path))
}

/// Extract from the body of a REST response
pub fn rest_data<T: DeserializeOwned>(response: &RestResponse, path: &str) -> Result<T> {
    extract(&response.data, path)
}
