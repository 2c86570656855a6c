//! AWS AppSync realtime variant (C7, §4.7).
//!
//! Reuses the Apollo wire grammar wholesale — AppSync's realtime endpoint
//! speaks `graphql-ws` with two additions: a signed-URL handshake and a
//! `start_ack` message per subscription. Both additions are handled here so
//! `crate::transport::Transport` stays oblivious to AppSync entirely.

use crate::error::{GqlError, Result};
use crate::model::GraphQLRequest;
use crate::protocol::{Answer, ApolloProtocol, Protocol};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use reqsign_aws_v4::{Credential, DefaultCredentialProvider, RequestSigner, StaticCredentialProvider};
use reqsign_core::{Context, OsEnv, ProvideCredentialChain, Signer};
use reqsign_file_read_tokio::TokioFileRead;
use reqsign_http_send_reqwest::ReqwestHttpSend;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Headers for the connect handshake and for each subscribe operation.
#[async_trait]
pub trait AppSyncAuthenticator: Send + Sync {
    async fn headers_for_connect(&self) -> Result<HashMap<String, String>>;
    async fn headers_for_operation(&self, serialized_query: &str) -> Result<HashMap<String, String>>;
}

/// Fixed API key authentication.
pub struct ApiKeyAuthenticator {
    host: String,
    api_key: String,
}

impl ApiKeyAuthenticator {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        ApiKeyAuthenticator {
            host: host.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AppSyncAuthenticator for ApiKeyAuthenticator {
    async fn headers_for_connect(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([
            ("host".into(), self.host.clone()),
            ("x-api-key".into(), self.api_key.clone()),
        ]))
    }

    async fn headers_for_operation(&self, _serialized_query: &str) -> Result<HashMap<String, String>> {
        self.headers_for_connect().await
    }
}

/// Fixed JWT (Cognito user pool or OIDC) authentication.
pub struct JwtAuthenticator {
    host: String,
    token: String,
}

impl JwtAuthenticator {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        JwtAuthenticator {
            host: host.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl AppSyncAuthenticator for JwtAuthenticator {
    async fn headers_for_connect(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([
            ("host".into(), self.host.clone()),
            ("Authorization".into(), self.token.clone()),
        ]))
    }

    async fn headers_for_operation(&self, _serialized_query: &str) -> Result<HashMap<String, String>> {
        self.headers_for_connect().await
    }
}

/// IAM/SigV4 authentication. Signs a synthetic POST request over the
/// connect or operation body, exactly as the real HTTP endpoint would be
/// signed, and lifts the resulting headers onto the websocket handshake or
/// the per-operation `extensions.authorization` block.
pub struct IamAuthenticator {
    host: String,
    region: String,
    signer: Signer<Credential>,
}

fn extract_region(host: &str) -> Option<String> {
    let re = Regex::new(r"appsync-api\.([a-zA-Z0-9-]+)\.").ok()?;
    re.captures(host)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

impl IamAuthenticator {
    /// `region` overrides the host-derived region when the host doesn't
    /// follow the standard `appsync-api.<region>.` naming.
    pub fn new(host: impl Into<String>, region: Option<String>) -> Result<Self> {
        let host = host.into();
        let region = region
            .or_else(|| extract_region(&host))
            .ok_or_else(|| GqlError::ConnectFailed("could not determine AWS region from host".into()))?;

        let ctx = Context::new()
            .with_file_read(TokioFileRead)
            .with_http_send(ReqwestHttpSend::default())
            .with_env(OsEnv);
        let loader = ProvideCredentialChain::new().push(DefaultCredentialProvider::new());
        let builder = RequestSigner::new("appsync", &region);
        let signer = Signer::new(ctx, loader, builder);

        Ok(IamAuthenticator { host, region, signer })
    }

    /// Construct with explicit static credentials instead of the default
    /// environment/profile chain.
    pub fn with_static_credentials(
        host: impl Into<String>,
        region: impl Into<String>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        let host = host.into();
        let region = region.into();
        let ctx = Context::new()
            .with_file_read(TokioFileRead)
            .with_http_send(ReqwestHttpSend::default())
            .with_env(OsEnv);
        let loader = ProvideCredentialChain::new()
            .push(StaticCredentialProvider::new(access_key_id, secret_access_key));
        let builder = RequestSigner::new("appsync", &region);
        let signer = Signer::new(ctx, loader, builder);
        IamAuthenticator { host, region, signer }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn sign(&self, path: &str, body: &str) -> Result<HashMap<String, String>> {
        let url = format!("https://{}{}", self.host, path);
        let (mut parts, _body) = http::Request::builder()
            .method("POST")
            .uri(&url)
            .header("accept", "application/json, text/javascript")
            .header("content-encoding", "amz-1.0")
            .header("content-type", "application/json; charset=UTF-8")
            .body(body.as_bytes().to_vec())
            .map_err(|e| GqlError::ConnectFailed(e.to_string()))?
            .into_parts();

        self.signer
            .sign(&mut parts, None)
            .await
            .map_err(|e| GqlError::ConnectFailed(format!("SigV4 signing failed: {e}")))?;

        let mut headers: HashMap<String, String> = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        headers.insert("host".into(), self.host.clone());
        Ok(headers)
    }
}

#[async_trait]
impl AppSyncAuthenticator for IamAuthenticator {
    async fn headers_for_connect(&self) -> Result<HashMap<String, String>> {
        self.sign("/graphql/connect", "{}").await
    }

    async fn headers_for_operation(&self, serialized_query: &str) -> Result<HashMap<String, String>> {
        self.sign("/graphql", serialized_query).await
    }
}

/// Rewrites a plain AppSync HTTP endpoint into the signed realtime WebSocket
/// URL: `appsync-api` -> `appsync-realtime-api`, `https` -> `wss`, plus the
/// base64-encoded authorizing headers (§4.7).
pub async fn build_realtime_url(url: &str, auth: &dyn AppSyncAuthenticator) -> Result<String> {
    let headers = auth.headers_for_connect().await?;
    let encoded = STANDARD.encode(
        serde_json::to_string(&headers)
            .map_err(GqlError::from)?
            .as_bytes(),
    );
    let realtime_base = url
        .replacen("https://", "wss://", 1)
        .replacen("appsync-api", "appsync-realtime-api", 1);
    Ok(format!("{realtime_base}?header={encoded}&payload=e30="))
}

/// Wraps [`ApolloProtocol`] with the two AppSync wire differences: a signed
/// `extensions.authorization` block on every start frame, and the
/// `start_ack` / id-less `error` message variants.
pub struct AppSyncProtocol {
    inner: ApolloProtocol,
}

impl AppSyncProtocol {
    pub fn new() -> Self {
        AppSyncProtocol {
            inner: ApolloProtocol::new(),
        }
    }
}

impl Default for AppSyncProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for AppSyncProtocol {
    fn subprotocol(&self) -> &'static str {
        self.inner.subprotocol()
    }

    fn encode_init(&self, init_payload: &Value) -> String {
        self.inner.encode_init(init_payload)
    }

    fn encode_start(&self, query_id: i64, request: &GraphQLRequest) -> Result<String> {
        // AppSync wants the operation payload pre-serialized as a string
        // under `data`, with the signed headers alongside it (§4.7). The
        // authorization headers are expected to already be stashed in
        // `request.extensions["authorization"]` by the caller, since
        // signing is async and this trait method is not.
        let data = serde_json::to_string(&request.payload())?;
        let authorization = request
            .extensions
            .get("authorization")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({
            "id": query_id.to_string(),
            "type": "start",
            "payload": {
                "data": data,
                "extensions": {"authorization": authorization},
            },
        })
        .to_string())
    }

    fn encode_stop(&self, query_id: i64) -> String {
        self.inner.encode_stop(query_id)
    }

    fn encode_terminate(&self) -> Option<String> {
        self.inner.encode_terminate()
    }

    fn encode_pong(&self, payload: Option<Value>) -> Option<String> {
        self.inner.encode_pong(payload)
    }

    fn encode_ping(&self, payload: Option<Value>) -> Option<String> {
        self.inner.encode_ping(payload)
    }

    fn parse_answer(&self, text: &str) -> Result<Answer> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| GqlError::ProtocolError(format!("malformed JSON frame: {text}")))?;
        match value.get("type").and_then(Value::as_str) {
            Some("start_ack") => Ok(Answer::StartAck),
            Some("error") if value.get("id").is_none() => {
                Ok(Answer::ServerError(value.get("payload").cloned().unwrap_or(Value::Null)))
            }
            _ => self.inner.parse_answer(text),
        }
    }

    fn forbids_execute(&self) -> bool {
        true
    }
}

/// Attach a pre-signed `extensions.authorization` block to a request before
/// handing it to [`crate::transport::Transport::subscribe`], since signing
/// is async but `Protocol::encode_start` is not.
pub async fn authorize_request(
    mut request: GraphQLRequest,
    auth: &dyn AppSyncAuthenticator,
) -> Result<GraphQLRequest> {
    let serialized = serde_json::to_string(&request.payload())?;
    let headers = auth.headers_for_operation(&serialized).await?;
    request
        .extensions
        .insert("authorization".into(), serde_json::to_value(headers)?);
    Ok(request)
}
