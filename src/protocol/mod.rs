//! Message Codec (C3) and the `Protocol` strategy trait (C5/C6/C7).
//!
//! The base transport (`crate::transport`) holds exactly one `Protocol`
//! implementation and never branches on which dialect it is talking; each
//! dialect owns its own wire-format differences (§4.5, §4.6, §4.7).

pub mod apollo;
pub mod transport_ws;

use crate::error::{GqlError, Result};
use crate::model::{ExecutionResult, GraphQLRequest};
use serde_json::Value;

pub use apollo::ApolloProtocol;
pub use transport_ws::TransportWsProtocol;

/// What the receive loop dispatches an incoming envelope to, independent of
/// which dialect produced it (§4.3).
#[derive(Debug, Clone)]
pub enum Answer {
    /// `connection_ack`, with its optional payload.
    Ack(Option<Value>),
    /// Unidirectional server keepalive (`ka` in Apollo).
    KeepAlive,
    /// Bidirectional liveness ping; the base must reply with `Pong`.
    Ping(Option<Value>),
    /// Bidirectional liveness pong; resets the keep-alive timer.
    Pong(Option<Value>),
    /// An in-progress per-subscription acknowledgment (AppSync `start_ack`).
    StartAck,
    /// A successful or partial answer for `id`.
    Data { id: i64, result: ExecutionResult },
    /// A terminal per-operation error for `id`.
    QueryError { id: i64, errors: Vec<Value> },
    /// The server ended the stream for `id`.
    Complete { id: i64 },
    /// A connection-scope error (`connection_error`, or an AppSync `error`
    /// with no id).
    ServerError(Value),
}

/// One subprotocol's send/parse policy. The base transport is written once
/// against this trait and is oblivious to which dialect it is driving.
pub trait Protocol: Send + Sync {
    /// Token sent in the `Sec-WebSocket-Protocol` header.
    fn subprotocol(&self) -> &'static str;

    /// Build the `connection_init` frame.
    fn encode_init(&self, init_payload: &Value) -> String;

    /// Build the start/subscribe frame for a new operation.
    fn encode_start(&self, query_id: i64, request: &GraphQLRequest) -> Result<String>;

    /// Build the stop/complete frame sent by the client to cancel `query_id`.
    fn encode_stop(&self, query_id: i64) -> String;

    /// Build the transport-level termination frame, if this dialect has one.
    fn encode_terminate(&self) -> Option<String>;

    /// Build a reply to an inbound ping, if this dialect uses bidirectional
    /// ping/pong.
    fn encode_pong(&self, payload: Option<Value>) -> Option<String>;

    /// Build a client-initiated ping, if this dialect supports one.
    fn encode_ping(&self, payload: Option<Value>) -> Option<String>;

    /// Parse one inbound text frame into an [`Answer`].
    fn parse_answer(&self, text: &str) -> Result<Answer>;

    /// Whether this dialect's endpoint only serves subscriptions. AppSync's
    /// realtime endpoint rejects queries/mutations outright (§4.7); every
    /// other dialect allows single-shot operations over the same socket.
    fn forbids_execute(&self) -> bool {
        false
    }
}

/// Shared envelope shape used by every dialect (§4.3): `{id?, type, payload?}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct RawEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

pub(crate) fn parse_envelope(text: &str) -> Result<RawEnvelope> {
    serde_json::from_str(text)
        .map_err(|_| GqlError::ProtocolError(format!("malformed JSON frame: {text}")))
}

/// Parse the `id` field as required for id-bearing message types.
pub(crate) fn require_id(envelope: &RawEnvelope) -> Result<i64> {
    let raw = envelope
        .id
        .as_ref()
        .ok_or_else(|| GqlError::ProtocolError(format!("missing id on {} message", envelope.kind)))?;
    raw.parse::<i64>()
        .map_err(|_| GqlError::ProtocolError(format!("non-numeric id: {raw}")))
}

/// Parse a `data`/`next` payload into an [`ExecutionResult`], enforcing the
/// "data or errors present" well-formedness rule (§4.3).
pub(crate) fn parse_execution_result(payload: Option<Value>) -> Result<ExecutionResult> {
    let payload = payload
        .ok_or_else(|| GqlError::ProtocolError("data message missing payload".into()))?;
    if !payload.is_object() {
        return Err(GqlError::ProtocolError("payload is not an object".into()));
    }
    let result: ExecutionResult = serde_json::from_value(payload)?;
    if !result.is_well_formed() {
        return Err(GqlError::ProtocolError(
            "payload does not contain 'data' or 'errors'".into(),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_rejects_garbage() {
        assert!(parse_envelope("not json").is_err());
    }

    #[test]
    fn test_require_id_rejects_missing_and_non_numeric() {
        let env = RawEnvelope {
            id: None,
            kind: "data".into(),
            payload: None,
        };
        assert!(require_id(&env).is_err());

        let env = RawEnvelope {
            id: Some("abc".into()),
            kind: "data".into(),
            payload: None,
        };
        assert!(require_id(&env).is_err());
    }

    #[test]
    fn test_parse_execution_result_requires_data_or_errors() {
        assert!(parse_execution_result(Some(serde_json::json!({}))).is_err());
        assert!(parse_execution_result(Some(serde_json::json!({"data": {"a": 1}}))).is_ok());
    }
}
