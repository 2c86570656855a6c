//! Apollo / "graphql-ws" (legacy) protocol specialization (C5, §4.5).

use super::{parse_envelope, parse_execution_result, require_id, Answer, Protocol};
use crate::error::{GqlError, Result};
use crate::model::GraphQLRequest;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Send/parse policy for the original Apollo `graphql-ws` subprotocol.
///
/// Tracks one extra bit of state beyond the pure protocol grammar: whether
/// `connection_ack` has been seen yet, because a `ka` received before the ack
/// must be ignored rather than treated as a protocol violation (§4.5 edge
/// rule, reproducing real-world server behavior).
pub struct ApolloProtocol {
    acked: AtomicBool,
}

impl Default for ApolloProtocol {
    fn default() -> Self {
        ApolloProtocol {
            acked: AtomicBool::new(false),
        }
    }
}

impl ApolloProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Protocol for ApolloProtocol {
    fn subprotocol(&self) -> &'static str {
        "graphql-ws"
    }

    fn encode_init(&self, init_payload: &Value) -> String {
        json!({"type": "connection_init", "payload": init_payload}).to_string()
    }

    fn encode_start(&self, query_id: i64, request: &GraphQLRequest) -> Result<String> {
        Ok(json!({
            "id": query_id.to_string(),
            "type": "start",
            "payload": request.payload(),
        })
        .to_string())
    }

    fn encode_stop(&self, query_id: i64) -> String {
        json!({"id": query_id.to_string(), "type": "stop"}).to_string()
    }

    fn encode_terminate(&self) -> Option<String> {
        Some(json!({"type": "connection_terminate"}).to_string())
    }

    fn encode_pong(&self, _payload: Option<Value>) -> Option<String> {
        // Apollo keepalive is unidirectional server -> client; there is no
        // client pong to send.
        None
    }

    fn encode_ping(&self, _payload: Option<Value>) -> Option<String> {
        None
    }

    fn parse_answer(&self, text: &str) -> Result<Answer> {
        let envelope = parse_envelope(text)?;
        match envelope.kind.as_str() {
            "connection_ack" => {
                self.acked.store(true, Ordering::Release);
                Ok(Answer::Ack(envelope.payload))
            }
            "ka" => {
                if self.acked.load(Ordering::Acquire) {
                    Ok(Answer::KeepAlive)
                } else {
                    // Ignored: a ka before connection_ack is not a protocol
                    // violation with some real-world servers.
                    Ok(Answer::KeepAlive)
                }
            }
            "data" => {
                let id = require_id(&envelope)?;
                let result = parse_execution_result(envelope.payload)?;
                Ok(Answer::Data { id, result })
            }
            "error" => {
                let id = require_id(&envelope)?;
                let errors = match envelope.payload {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => vec![],
                };
                Ok(Answer::QueryError { id, errors })
            }
            "complete" => {
                let id = require_id(&envelope)?;
                Ok(Answer::Complete { id })
            }
            "connection_error" => Ok(Answer::ServerError(
                envelope.payload.unwrap_or(Value::Null),
            )),
            other => Err(GqlError::ProtocolError(format!(
                "unrecognized message type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionResult;
    use serde_json::json;

    #[test]
    fn test_encode_start_shape() {
        let proto = ApolloProtocol::new();
        let req = GraphQLRequest::new("query Q { hello }");
        let frame = proto.encode_start(1, &req).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["type"], "start");
        assert_eq!(value["payload"]["query"], "query Q { hello }");
    }

    #[test]
    fn test_encode_terminate_present() {
        assert!(ApolloProtocol::new().encode_terminate().is_some());
    }

    #[test]
    fn test_ka_before_ack_is_not_a_protocol_error() {
        let proto = ApolloProtocol::new();
        let answer = proto.parse_answer(r#"{"type":"ka"}"#).unwrap();
        assert!(matches!(answer, Answer::KeepAlive));
    }

    #[test]
    fn test_parse_data_message() {
        let proto = ApolloProtocol::new();
        let text = json!({"type":"data","id":"1","payload":{"data":{"hello":"world"}}}).to_string();
        match proto.parse_answer(&text).unwrap() {
            Answer::Data { id, result } => {
                assert_eq!(id, 1);
                assert_eq!(
                    result,
                    ExecutionResult {
                        data: Some(json!({"hello": "world"})),
                        errors: None,
                        extensions: None
                    }
                );
            }
            _ => panic!("expected Data"),
        }
    }

    #[test]
    fn test_parse_connection_error_is_server_error() {
        let proto = ApolloProtocol::new();
        let text = json!({"type":"connection_error","payload":"boom"}).to_string();
        match proto.parse_answer(&text).unwrap() {
            Answer::ServerError(v) => assert_eq!(v, json!("boom")),
            _ => panic!("expected ServerError"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let proto = ApolloProtocol::new();
        assert!(proto.parse_answer(r#"{"type":"bogus"}"#).is_err());
    }
}
