//! Single-shot HTTP transport (C10, ambient boundary, §4.10).
//!
//! Exists so `ClientSession` has a second concrete `GqlTransport` to compose
//! with beyond the WebSocket subscription transport; all of the interesting
//! state-machine engineering lives in `crate::transport`.

use crate::error::{GqlError, Result};
use crate::model::{ExecutionResult, GraphQLRequest};
use crate::transport::{GqlTransport, SubscriptionStream};
use async_trait::async_trait;

/// POSTs a GraphQL request body to a single HTTP endpoint and parses the
/// JSON response into an [`ExecutionResult`].
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        HttpTransport {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl GqlTransport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        // Nothing to open ahead of time: every operation is its own request.
        Ok(())
    }

    async fn execute(&self, request: GraphQLRequest) -> Result<ExecutionResult> {
        let response = self
            .client
            .post(&self.url)
            .json(&request.payload())
            .send()
            .await?
            .error_for_status()?;
        let result: ExecutionResult = response.json().await?;
        if !result.is_well_formed() {
            return Err(GqlError::ProtocolError(
                "response contains neither data nor errors".into(),
            ));
        }
        Ok(result)
    }

    async fn subscribe(&self, _request: GraphQLRequest) -> Result<SubscriptionStream> {
        Err(GqlError::ProtocolError(
            "subscriptions not supported".into(),
        ))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_is_rejected() {
        let transport = HttpTransport::new("http://localhost:9/graphql");
        let err = transport
            .subscribe(GraphQLRequest::new("subscription { x }"))
            .await
            .unwrap_err();
        assert!(matches!(err, GqlError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_connect_is_a_noop() {
        let transport = HttpTransport::new("http://localhost:9/graphql");
        assert!(transport.connect().await.is_ok());
    }
}
