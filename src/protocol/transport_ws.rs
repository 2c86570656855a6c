//! `graphql-transport-ws` (current) protocol specialization (C6, §4.6).

use super::{parse_envelope, parse_execution_result, require_id, Answer, Protocol};
use crate::error::{GqlError, Result};
use crate::model::GraphQLRequest;
use serde_json::{json, Value};

/// Send/parse policy for the `graphql-transport-ws` subprotocol.
///
/// Unlike Apollo, liveness is bidirectional ping/pong and there is no
/// connection-level terminate frame: closing the socket is the only way to
/// end the connection (§4.6).
#[derive(Default)]
pub struct TransportWsProtocol;

impl TransportWsProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for TransportWsProtocol {
    fn subprotocol(&self) -> &'static str {
        "graphql-transport-ws"
    }

    fn encode_init(&self, init_payload: &Value) -> String {
        json!({"type": "connection_init", "payload": init_payload}).to_string()
    }

    fn encode_start(&self, query_id: i64, request: &GraphQLRequest) -> Result<String> {
        Ok(json!({
            "id": query_id.to_string(),
            "type": "subscribe",
            "payload": request.payload(),
        })
        .to_string())
    }

    fn encode_stop(&self, query_id: i64) -> String {
        json!({"id": query_id.to_string(), "type": "complete"}).to_string()
    }

    fn encode_terminate(&self) -> Option<String> {
        None
    }

    fn encode_pong(&self, payload: Option<Value>) -> Option<String> {
        Some(match payload {
            Some(p) => json!({"type": "pong", "payload": p}).to_string(),
            None => json!({"type": "pong"}).to_string(),
        })
    }

    fn encode_ping(&self, payload: Option<Value>) -> Option<String> {
        Some(match payload {
            Some(p) => json!({"type": "ping", "payload": p}).to_string(),
            None => json!({"type": "ping"}).to_string(),
        })
    }

    fn parse_answer(&self, text: &str) -> Result<Answer> {
        let envelope = parse_envelope(text)?;
        match envelope.kind.as_str() {
            "connection_ack" => Ok(Answer::Ack(envelope.payload)),
            "ping" => Ok(Answer::Ping(envelope.payload)),
            "pong" => Ok(Answer::Pong(envelope.payload)),
            "next" => {
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
            other => Err(GqlError::ProtocolError(format!(
                "unrecognized message type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_stop_uses_complete_type() {
        let frame = TransportWsProtocol::new().encode_stop(7);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["id"], "7");
    }

    #[test]
    fn test_no_terminate_message() {
        assert!(TransportWsProtocol::new().encode_terminate().is_none());
    }

    #[test]
    fn test_parse_error_payload_is_array_directly() {
        let proto = TransportWsProtocol::new();
        let text = json!({"type":"error","id":"1","payload":[{"message":"boom"}]}).to_string();
        match proto.parse_answer(&text).unwrap() {
            Answer::QueryError { id, errors } => {
                assert_eq!(id, 1);
                assert_eq!(errors, vec![json!({"message": "boom"})]);
            }
            _ => panic!("expected QueryError"),
        }
    }

    #[test]
    fn test_round_trip_subscribe_then_complete() {
        let proto = TransportWsProtocol::new();
        let req = GraphQLRequest::new("subscription { countdown }");
        let start = proto.encode_start(3, &req).unwrap();
        let decoded: Value = serde_json::from_str(&start).unwrap();
        assert_eq!(decoded["id"], "3");
        assert_eq!(decoded["type"], "subscribe");

        let stop = proto.encode_stop(3);
        let decoded: Value = serde_json::from_str(&stop).unwrap();
        assert_eq!(decoded["id"], "3");
        assert_eq!(decoded["type"], "complete");
    }

    #[test]
    fn test_ping_requires_pong_reply() {
        let proto = TransportWsProtocol::new();
        let answer = proto.parse_answer(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(answer, Answer::Ping(None)));
        assert!(proto.encode_pong(None).is_some());
    }
}
