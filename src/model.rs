//! Wire-level and application-level data model shared by every transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A parsed GraphQL operation ready to send.
///
/// Immutable once built. `extensions` carries transport-specific metadata,
/// such as the AppSync signed-header block injected by [`crate::appsync`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub extensions: HashMap<String, Value>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            variables: None,
            operation_name: None,
            extensions: HashMap::new(),
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// The `{query, variables, operationName}` payload object sent in
    /// start/subscribe messages, built without `extensions`.
    pub fn payload(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("query".into(), Value::String(self.query.clone()));
        if let Some(vars) = &self.variables {
            map.insert("variables".into(), vars.clone());
        }
        if let Some(name) = &self.operation_name {
            map.insert("operationName".into(), Value::String(name.clone()));
        }
        Value::Object(map)
    }
}

/// One GraphQL error object, as carried in `errors` or in an `error` message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// The answer to a single GraphQL operation. Either `data` or `errors` must
/// be present for a well-formed answer (enforced by the codec, not by this
/// type).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    pub fn is_well_formed(&self) -> bool {
        self.data.is_some() || self.errors.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_payload_omits_absent_fields() {
        let req = GraphQLRequest::new("query Q { hello }");
        assert_eq!(req.payload(), json!({"query": "query Q { hello }"}));
    }

    #[test]
    fn test_request_payload_includes_variables_and_name() {
        let req = GraphQLRequest::new("query Q($x: Int) { f(x: $x) }")
            .with_variables(json!({"x": 1}))
            .with_operation_name("Q");
        assert_eq!(
            req.payload(),
            json!({"query": "query Q($x: Int) { f(x: $x) }", "variables": {"x": 1}, "operationName": "Q"})
        );
    }

    #[test]
    fn test_execution_result_well_formed() {
        assert!(ExecutionResult {
            data: Some(json!({"hello": "world"})),
            ..Default::default()
        }
        .is_well_formed());
        assert!(ExecutionResult {
            errors: Some(vec![GraphQLError {
                message: "boom".into(),
                locations: None,
                path: None,
                extensions: None
            }]),
            ..Default::default()
        }
        .is_well_formed());
        assert!(!ExecutionResult::default().is_well_formed());
    }
}
