//! Client Session (C8, §4.8): the transport-agnostic request/response
//! pipeline applications actually call.

use crate::error::{GqlError, Result};
use crate::model::{ExecutionResult, GraphQLRequest};
use crate::transport::{GqlTransport, SubscriptionStream};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Wraps one [`GqlTransport`] (WebSocket or HTTP) behind the pipeline every
/// caller goes through: validation hooks, then the transport call, then
/// result parsing hooks.
pub struct ClientSession {
    transport: Arc<dyn GqlTransport>,
}

impl ClientSession {
    pub fn new(transport: Box<dyn GqlTransport>) -> Self {
        ClientSession {
            transport: Arc::from(transport),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    /// Multi-operation documents require an explicit operation name so the
    /// transport knows which one to run.
    fn validate(request: &GraphQLRequest) -> Result<()> {
        let operation_count = request.query.matches("query ").count()
            + request.query.matches("mutation ").count()
            + request.query.matches("subscription ").count();
        if operation_count > 1 && request.operation_name.is_none() {
            return Err(GqlError::QueryError {
                query_id: None,
                message: "multi-operation document requires an operation name".into(),
                errors: vec![],
                data: None,
            });
        }
        Ok(())
    }

    pub async fn execute(&self, request: GraphQLRequest) -> Result<ExecutionResult> {
        Self::validate(&request)?;
        let result = self.transport.execute(request).await?;
        Self::surface_query_errors(result)
    }

    pub async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        Self::validate(&request)?;
        self.transport.subscribe(request).await
    }

    pub async fn close(&self) {
        self.transport.close().await
    }

    fn surface_query_errors(result: ExecutionResult) -> Result<ExecutionResult> {
        if let Some(errors) = &result.errors {
            if !errors.is_empty() {
                return Err(GqlError::QueryError {
                    query_id: None,
                    message: "operation returned errors".into(),
                    errors: errors
                        .iter()
                        .map(|e| serde_json::to_value(e).unwrap_or(serde_json::Value::Null))
                        .collect(),
                    data: result.data.clone(),
                });
            }
        }
        Ok(result)
    }
}

/// Synchronous façade over [`ClientSession`], running the async core on a
/// private event loop for callers that are not themselves async.
pub struct BlockingClientSession {
    session: ClientSession,
    runtime: Arc<Runtime>,
}

impl BlockingClientSession {
    pub fn new(transport: Box<dyn GqlTransport>) -> std::io::Result<Self> {
        Ok(BlockingClientSession {
            session: ClientSession::new(transport),
            runtime: Arc::new(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?,
            ),
        })
    }

    pub fn connect(&self) -> Result<()> {
        self.runtime.block_on(self.session.connect())
    }

    pub fn execute_blocking(&self, request: GraphQLRequest) -> Result<ExecutionResult> {
        self.runtime.block_on(self.session.execute(request))
    }

    /// Returns a blocking iterator over the subscription's answers. Dropping
    /// it before it runs out drives the clean-close cancellation path
    /// synchronously, before the drop unwinds, rather than leaving it to a
    /// detached task the way the async `SubscriptionStream` does.
    pub fn subscribe_blocking(&self, request: GraphQLRequest) -> Result<BlockingSubscription> {
        let stream = self.runtime.block_on(self.session.subscribe(request))?;
        Ok(BlockingSubscription {
            stream: Some(stream),
            runtime: self.runtime.clone(),
        })
    }

    pub fn close(&self) {
        self.runtime.block_on(self.session.close())
    }
}

/// Iterator handle for [`BlockingClientSession::subscribe_blocking`].
pub struct BlockingSubscription {
    stream: Option<SubscriptionStream>,
    runtime: Arc<Runtime>,
}

impl Iterator for BlockingSubscription {
    type Item = Result<ExecutionResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        self.runtime.block_on(stream.next_item())
    }
}

impl Drop for BlockingSubscription {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.runtime.block_on(stream.cancel());
        }
    }
}
