//! Supervised Reconnecting Session (C9, §4.9).
//!
//! Wraps a [`GqlTransport`] factory with two independent retry policies: one
//! around `connect`, one around each `execute`/`subscribe` call. A
//! `ConnectionFailed` observed mid-subscription ends that subscription's
//! iterator; the caller's next operation is what triggers reconnection.

use crate::error::{GqlError, Result};
use crate::model::{ExecutionResult, GraphQLRequest};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::transport::{GqlTransport, SubscriptionStream};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Builds a fresh transport for each (re)connect attempt. Transports are not
/// reusable after `close`, so a factory rather than a stored instance is
/// needed to actually reconnect.
pub trait TransportFactory: Send + Sync {
    fn build(&self) -> Box<dyn GqlTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn GqlTransport> + Send + Sync,
{
    fn build(&self) -> Box<dyn GqlTransport> {
        (self)()
    }
}

pub struct SupervisedSession {
    factory: Arc<dyn TransportFactory>,
    retry_connect: RetryPolicy,
    retry_execute: RetryPolicy,
    current: RwLock<Option<Arc<dyn GqlTransport>>>,
}

impl SupervisedSession {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        retry_connect: RetryPolicy,
        retry_execute: RetryPolicy,
    ) -> Self {
        SupervisedSession {
            factory,
            retry_connect,
            retry_execute,
            current: RwLock::new(None),
        }
    }

    async fn connected_transport(&self) -> Result<Arc<dyn GqlTransport>> {
        if let Some(transport) = self.current.read().await.clone() {
            // A fatal error observed inside a live subscription closes the
            // transport without ever surfacing `ConnectionFailed` from a
            // direct `execute`/`subscribe` call on it (§4.9), so the cached
            // handle has to be checked here rather than only reacting to
            // that error from the calls below.
            if !transport.is_closed().await {
                return Ok(transport);
            }
            self.invalidate().await;
        }
        self.reconnect().await
    }

    async fn reconnect(&self) -> Result<Arc<dyn GqlTransport>> {
        let executor = RetryExecutor::new(&self.retry_connect);
        let factory = self.factory.clone();
        let transport: Arc<dyn GqlTransport> = executor
            .run(|| {
                let transport: Arc<dyn GqlTransport> = Arc::from(factory.build());
                async move {
                    transport.connect().await?;
                    Ok::<_, GqlError>(transport)
                }
            })
            .await?;
        *self.current.write().await = Some(transport.clone());
        Ok(transport)
    }

    async fn invalidate(&self) {
        if let Some(transport) = self.current.write().await.take() {
            transport.close().await;
        }
    }

    pub async fn execute(&self, request: GraphQLRequest) -> Result<ExecutionResult> {
        let executor = RetryExecutor::new(&self.retry_execute);
        executor
            .run(|| {
                let request = request.clone();
                async move {
                    let transport = self.connected_transport().await?;
                    match transport.execute(request).await {
                        Err(e @ GqlError::ConnectionFailed(_)) => {
                            warn!("connection failed during execute, will reconnect");
                            self.invalidate().await;
                            Err(e)
                        }
                        other => other,
                    }
                }
            })
            .await
    }

    /// Subscribing does not itself retry: a `ConnectionFailed` observed
    /// while the returned stream is live ends that stream, per §4.9. Retry
    /// only governs establishing the initial subscription.
    pub async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        let executor = RetryExecutor::new(&self.retry_execute);
        executor
            .run(|| {
                let request = request.clone();
                async move {
                    let transport = self.connected_transport().await?;
                    match transport.subscribe(request).await {
                        Err(e @ GqlError::ConnectionFailed(_)) => {
                            self.invalidate().await;
                            Err(e)
                        }
                        other => other,
                    }
                }
            })
            .await
    }

    pub async fn close(&self) {
        self.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionResult as Exec;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyTransport {
        connect_attempts: Arc<AtomicU32>,
        fail_connects: u32,
    }

    #[async_trait]
    impl GqlTransport for FlakyTransport {
        async fn connect(&self) -> Result<()> {
            let n = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_connects {
                Err(GqlError::ConnectFailed("simulated".into()))
            } else {
                Ok(())
            }
        }
        async fn execute(&self, _request: GraphQLRequest) -> Result<ExecutionResult> {
            Ok(Exec {
                data: Some(serde_json::json!({"ok": true})),
                errors: None,
                extensions: None,
            })
        }
        async fn subscribe(&self, _request: GraphQLRequest) -> Result<SubscriptionStream> {
            Err(GqlError::ProtocolError("not exercised in this stub".into()))
        }
        async fn close(&self) {}
    }

    struct CountingFactory {
        connect_attempts: Arc<AtomicU32>,
        fail_connects: u32,
    }

    impl TransportFactory for CountingFactory {
        fn build(&self) -> Box<dyn GqlTransport> {
            Box::new(FlakyTransport {
                connect_attempts: self.connect_attempts.clone(),
                fail_connects: self.fail_connects,
            })
        }
    }

    #[tokio::test]
    async fn test_reconnects_through_initial_connect_failures() {
        let connect_attempts = Arc::new(AtomicU32::new(0));
        let factory = Arc::new(CountingFactory {
            connect_attempts: connect_attempts.clone(),
            fail_connects: 2,
        });
        let session = SupervisedSession::new(
            factory,
            RetryPolicy::fixed(Duration::from_millis(1), 5),
            RetryPolicy::none(),
        );

        let result = session.execute(GraphQLRequest::new("query { x }")).await;
        assert!(result.is_ok());
        assert_eq!(connect_attempts.load(Ordering::SeqCst), 3);
    }

    /// A transport that reports itself `is_closed` once a shared flag is
    /// flipped, simulating a fatal error observed inside a live
    /// subscription's receive loop (which never surfaces as a
    /// `ConnectionFailed` return value from `execute`/`subscribe` directly).
    struct SelfClosingTransport {
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl GqlTransport for SelfClosingTransport {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _request: GraphQLRequest) -> Result<ExecutionResult> {
            Ok(Exec {
                data: Some(serde_json::json!({"ok": true})),
                errors: None,
                extensions: None,
            })
        }
        async fn subscribe(&self, _request: GraphQLRequest) -> Result<SubscriptionStream> {
            Err(GqlError::ProtocolError("not exercised in this stub".into()))
        }
        async fn close(&self) {}
        async fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct SelfClosingFactory {
        connect_attempts: Arc<AtomicU32>,
        closed_flag: Arc<std::sync::atomic::AtomicBool>,
    }

    impl TransportFactory for SelfClosingFactory {
        fn build(&self) -> Box<dyn GqlTransport> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            // Each freshly (re)built transport starts open; only the flag
            // shared with the test drives it closed.
            self.closed_flag.store(false, Ordering::SeqCst);
            Box::new(SelfClosingTransport {
                closed: self.closed_flag.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_cached_transport_reports_closed() {
        let connect_attempts = Arc::new(AtomicU32::new(0));
        let closed_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let factory = Arc::new(SelfClosingFactory {
            connect_attempts: connect_attempts.clone(),
            closed_flag: closed_flag.clone(),
        });
        let session = SupervisedSession::new(factory, RetryPolicy::none(), RetryPolicy::none());

        session
            .execute(GraphQLRequest::new("query { x }"))
            .await
            .unwrap();
        assert_eq!(connect_attempts.load(Ordering::SeqCst), 1);

        // Simulate the receive loop closing the transport out from under
        // the cached handle, with no `ConnectionFailed` ever returned
        // directly from `execute`/`subscribe`.
        closed_flag.store(true, Ordering::SeqCst);

        session
            .execute(GraphQLRequest::new("query { x }"))
            .await
            .unwrap();
        assert_eq!(connect_attempts.load(Ordering::SeqCst), 2);
    }
}
