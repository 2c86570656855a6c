//! Subscription Transport Base (C4, §4.4).
//!
//! Owns exactly one adapter and one protocol, and is oblivious to which
//! dialect it drives: `Apollo` vs `graphql-transport-ws` vs AppSync
//! differences live entirely behind the [`crate::protocol::Protocol`] trait
//! object.

mod stream;

pub use stream::SubscriptionStream;

use crate::adapter::WebSocketAdapter;
use crate::error::{GqlError, Result};
use crate::listener::{get_next, ListenerState, QueueItem};
use crate::model::{ExecutionResult, GraphQLRequest};
use crate::protocol::{Answer, Protocol};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle state of a transport (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Tunable timeouts and behavior knobs (§5).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub keep_alive_timeout: Option<Duration>,
    pub ping_interval: Option<Duration>,
    pub pong_timeout: Duration,
    pub close_timeout: Duration,
    pub listener_capacity: usize,
    pub init_payload: Value,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            keep_alive_timeout: None,
            ping_interval: None,
            pong_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            listener_capacity: 16,
            init_payload: Value::Null,
        }
    }
}

/// Fluent builder mirroring the style used across this codebase for
/// multi-field configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportBuilder {
    config: TransportConfig,
}

impl TransportBuilder {
    pub fn new() -> Self {
        TransportBuilder::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keep_alive_timeout = Some(timeout);
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = Some(interval);
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    pub fn listener_capacity(mut self, capacity: usize) -> Self {
        self.config.listener_capacity = capacity;
        self
    }

    pub fn init_payload(mut self, payload: Value) -> Self {
        self.config.init_payload = payload;
        self
    }

    pub fn build(
        self,
        adapter: Arc<dyn WebSocketAdapter>,
        protocol: Box<dyn Protocol>,
    ) -> Transport {
        Transport::new(adapter, protocol, self.config)
    }
}

/// Interchangeable surface a [`crate::session::ClientSession`] drives,
/// regardless of whether the concrete transport is a WebSocket subscription
/// transport or a single-shot HTTP transport (C10).
#[async_trait]
pub trait GqlTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn execute(&self, request: GraphQLRequest) -> Result<ExecutionResult>;
    async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream>;
    async fn close(&self);

    /// Batch execution is acknowledged as part of the HTTP sibling
    /// transport's contract but not built out here: batching is orthogonal
    /// to the WebSocket subscription engine this crate exists to implement.
    async fn execute_batch(&self, _requests: Vec<GraphQLRequest>) -> Result<Vec<ExecutionResult>> {
        Err(GqlError::ProtocolError("execute_batch is not implemented".into()))
    }

    /// Whether this transport has torn itself down and can no longer serve
    /// requests, so a caller like `crate::supervised::SupervisedSession`
    /// knows to reconnect instead of reusing a stale cached instance. A
    /// fatal error observed inside a live subscription's receive loop closes
    /// the transport without ever returning an error from `execute`/
    /// `subscribe` directly, so this is the only reliable signal.
    async fn is_closed(&self) -> bool {
        false
    }
}

struct Listeners {
    by_id: HashMap<i64, Arc<ListenerState>>,
}

struct Inner {
    adapter: Arc<dyn WebSocketAdapter>,
    protocol: Box<dyn Protocol>,
    config: TransportConfig,
    state: RwLock<TransportState>,
    listeners: RwLock<Listeners>,
    next_id: AtomicI64,
    keep_alive_seen: Notify,
    pong_seen: Notify,
    receive_task: RwLock<Option<JoinHandle<()>>>,
    keep_alive_task: RwLock<Option<JoinHandle<()>>>,
    ping_task: RwLock<Option<JoinHandle<()>>>,
}

/// A connected (or connecting) subscription transport driving one
/// `Protocol` over one `WebSocketAdapter` (§4.4).
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(
        adapter: Arc<dyn WebSocketAdapter>,
        protocol: Box<dyn Protocol>,
        config: TransportConfig,
    ) -> Self {
        Transport {
            inner: Arc::new(Inner {
                adapter,
                protocol,
                config,
                state: RwLock::new(TransportState::Disconnected),
                listeners: RwLock::new(Listeners {
                    by_id: HashMap::new(),
                }),
                next_id: AtomicI64::new(1),
                keep_alive_seen: Notify::new(),
                pong_seen: Notify::new(),
                receive_task: RwLock::new(None),
                keep_alive_task: RwLock::new(None),
                ping_task: RwLock::new(None),
            }),
        }
    }

    pub async fn state(&self) -> TransportState {
        *self.inner.state.read().await
    }

    async fn set_state(&self, state: TransportState) {
        *self.inner.state.write().await = state;
    }

    async fn install_listener(&self, send_stop: bool) -> (i64, Arc<ListenerState>, mpsc::Receiver<QueueItem>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (state, receiver) = ListenerState::new(id, self.inner.config.listener_capacity, send_stop);
        self.inner.listeners.write().await.by_id.insert(id, state.clone());
        (id, state, receiver)
    }

    async fn remove_listener(&self, id: i64) {
        self.inner.listeners.write().await.by_id.remove(&id);
    }

    async fn fail_all_listeners(&self, err: GqlError) {
        let mut listeners = self.inner.listeners.write().await;
        for (_, state) in listeners.by_id.drain() {
            state.put_error(err.clone()).await;
        }
    }

    /// Emit the stop/complete frame for `id` if the listener asked for one,
    /// then remove the listener. Called both from `subscribe`'s normal
    /// completion path and from `SubscriptionStream::drop`'s cleanup task.
    pub(crate) async fn cancel_subscription(&self, id: i64) {
        let send_stop = self
            .inner
            .listeners
            .read()
            .await
            .by_id
            .get(&id)
            .map(|s| s.send_stop())
            .unwrap_or(false);
        if send_stop {
            let frame = self.inner.protocol.encode_stop(id);
            let _ = self.inner.adapter.send(frame).await;
        }
        self.remove_listener(id).await;
    }

    async fn receive_loop(self_: Arc<Inner>, transport: Transport) {
        loop {
            let frame = match self_.adapter.receive().await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "adapter receive failed, closing transport");
                    transport.fail_all_listeners(e).await;
                    transport.spawn_close();
                    return;
                }
            };

            let answer = match self_.protocol.parse_answer(&frame) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(error = %e, "malformed frame, closing transport");
                    transport.fail_all_listeners(e).await;
                    transport.spawn_close();
                    return;
                }
            };

            match answer {
                Answer::Ack(_) => {
                    self_.keep_alive_seen.notify_waiters();
                }
                Answer::KeepAlive => {
                    self_.keep_alive_seen.notify_waiters();
                }
                Answer::Pong(_) => {
                    self_.keep_alive_seen.notify_waiters();
                    self_.pong_seen.notify_waiters();
                }
                Answer::Ping(payload) => {
                    self_.keep_alive_seen.notify_waiters();
                    if let Some(reply) = self_.protocol.encode_pong(payload) {
                        let _ = self_.adapter.send(reply).await;
                    }
                }
                Answer::StartAck => {}
                Answer::Data { id, result } => {
                    let listener = transport.inner.listeners.read().await.by_id.get(&id).cloned();
                    if let Some(listener) = listener {
                        listener.put(result).await;
                    } else {
                        debug!(id, "dropping data for unknown listener");
                    }
                }
                Answer::QueryError { id, errors } => {
                    let listener = transport.inner.listeners.write().await.by_id.remove(&id);
                    if let Some(listener) = listener {
                        listener.clear_send_stop();
                        listener
                            .put_error(GqlError::QueryError {
                                query_id: Some(id),
                                message: "operation failed".into(),
                                errors,
                                data: None,
                            })
                            .await;
                    }
                }
                Answer::Complete { id } => {
                    let listener = transport.inner.listeners.write().await.by_id.remove(&id);
                    if let Some(listener) = listener {
                        listener.clear_send_stop();
                        listener.close();
                    }
                }
                Answer::ServerError(payload) => {
                    warn!(?payload, "connection-scope server error");
                    transport
                        .fail_all_listeners(GqlError::ServerError(payload))
                        .await;
                    transport.spawn_close();
                    return;
                }
            }
        }
    }

    async fn keep_alive_loop(self_: Arc<Inner>, transport: Transport, timeout: Duration) {
        loop {
            let wait = self_.keep_alive_seen.notified();
            if tokio::time::timeout(timeout, wait).await.is_err() {
                warn!("no keep-alive observed within timeout, closing transport");
                transport
                    .fail_all_listeners(GqlError::server_error("no keep-alive received"))
                    .await;
                transport.spawn_close();
                return;
            }
        }
    }

    async fn ping_loop(self_: Arc<Inner>, transport: Transport, interval: Duration, pong_timeout: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(frame) = self_.protocol.encode_ping(None) else {
                return;
            };
            if self_.adapter.send(frame).await.is_err() {
                return;
            }
            let wait = self_.pong_seen.notified();
            if tokio::time::timeout(pong_timeout, wait).await.is_err() {
                warn!("no pong received within timeout, closing transport");
                transport
                    .fail_all_listeners(GqlError::server_error("no pong received"))
                    .await;
                transport.spawn_close();
                return;
            }
        }
    }
}

#[async_trait]
impl GqlTransport for Transport {
    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            if *state != TransportState::Disconnected {
                return Err(GqlError::AlreadyConnected);
            }
            *state = TransportState::Connecting;
        }

        self.inner.adapter.connect().await?;

        let init = self.inner.protocol.encode_init(&self.inner.config.init_payload);
        self.inner.adapter.send(init).await?;

        // Wait for connection_ack before starting the receive loop proper;
        // any frame that arrives first must still be the ack for this
        // simple handshake (no subscriptions exist yet to misroute to).
        let ack_wait = async {
            loop {
                let frame = self.inner.adapter.receive().await?;
                match self.inner.protocol.parse_answer(&frame)? {
                    Answer::Ack(_) => return Ok::<(), GqlError>(()),
                    Answer::ServerError(payload) => {
                        return Err(GqlError::ServerError(payload));
                    }
                    _ => continue,
                }
            }
        };
        tokio::time::timeout(self.inner.config.ack_timeout, ack_wait)
            .await
            .map_err(|_| GqlError::ConnectFailed("timed out waiting for connection_ack".into()))??;

        self.set_state(TransportState::Connected).await;

        let receive_handle = tokio::spawn(Transport::receive_loop(self.inner.clone(), self.clone()));
        *self.inner.receive_task.write().await = Some(receive_handle);

        if let Some(timeout) = self.inner.config.keep_alive_timeout {
            let handle = tokio::spawn(Transport::keep_alive_loop(
                self.inner.clone(),
                self.clone(),
                timeout,
            ));
            *self.inner.keep_alive_task.write().await = Some(handle);
        }

        if let Some(interval) = self.inner.config.ping_interval {
            let handle = tokio::spawn(Transport::ping_loop(
                self.inner.clone(),
                self.clone(),
                interval,
                self.inner.config.pong_timeout,
            ));
            *self.inner.ping_task.write().await = Some(handle);
        }

        Ok(())
    }

    async fn execute(&self, request: GraphQLRequest) -> Result<ExecutionResult> {
        if self.inner.protocol.forbids_execute() {
            return Err(GqlError::ProtocolError(
                "only subscriptions are allowed on this endpoint".into(),
            ));
        }
        // No stop is emitted on early cancellation: the server ends
        // single-shot operations with its own complete message (§4.4).
        let mut stream = self.subscribe_with_send_stop(request, false).await?;
        match stream.next_item().await {
            Some(item) => item,
            None => Err(GqlError::ProtocolError(
                "connection closed before any answer was received".into(),
            )),
        }
    }

    async fn subscribe(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        self.subscribe_with_send_stop(request, true).await
    }

    async fn close(&self) {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                // Idempotent: a second concurrent caller observes the
                // closed/closing state and returns (§5).
                TransportState::Closed => return,
                TransportState::Closing => return,
                _ => *state = TransportState::Closing,
            }
        }

        let ids: Vec<i64> = self.inner.listeners.read().await.by_id.keys().copied().collect();
        for id in ids {
            self.cancel_subscription(id).await;
        }

        let drain = async {
            loop {
                if self.inner.listeners.read().await.by_id.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let _ = tokio::time::timeout(self.inner.config.close_timeout, drain).await;

        if let Some(frame) = self.inner.protocol.encode_terminate() {
            let _ = self.inner.adapter.send(frame).await;
        }

        self.inner.adapter.close().await;

        if let Some(handle) = self.inner.keep_alive_task.write().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.ping_task.write().await.take() {
            handle.abort();
        }
        // Closing the adapter makes the blocking `receive` call return an
        // error, so the receive task exits on its own; just wait for it
        // rather than aborting (the receive task itself may be the caller
        // of `close` via `spawn_close`, in which case its handle is already
        // gone from `receive_task` and there is nothing to wait for).
        if let Some(handle) = self.inner.receive_task.write().await.take() {
            let _ = handle.await;
        }

        self.set_state(TransportState::Closed).await;
    }

    async fn is_closed(&self) -> bool {
        self.state().await == TransportState::Closed
    }
}

impl Transport {
    /// Run `close` on a detached task. Used by the receive loop and the
    /// keep-alive/ping monitors, which cannot `.await` their own close
    /// (that would await their own `JoinHandle` and deadlock).
    fn spawn_close(&self) {
        let transport = self.clone();
        tokio::spawn(async move { transport.close().await });
    }
}

impl Transport {
    async fn subscribe_with_send_stop(
        &self,
        request: GraphQLRequest,
        send_stop: bool,
    ) -> Result<SubscriptionStream> {
        if self.state().await != TransportState::Connected {
            return Err(GqlError::Closed);
        }
        let (id, state, receiver) = self.install_listener(send_stop).await;
        let frame = self.inner.protocol.encode_start(id, &request)?;
        if let Err(e) = self.inner.adapter.send(frame).await {
            self.remove_listener(id).await;
            return Err(e);
        }
        Ok(SubscriptionStream::new(self.clone(), id, state, receiver))
    }
}

pub(crate) async fn next_queue_item(
    state: &ListenerState,
    receiver: &mut mpsc::Receiver<QueueItem>,
) -> Option<QueueItem> {
    get_next(state, receiver).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransportWsProtocol;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    struct MockAdapter {
        to_transport: tokio::sync::Mutex<UnboundedReceiver<String>>,
        from_transport: UnboundedSender<String>,
    }

    impl MockAdapter {
        fn new() -> (Arc<Self>, UnboundedSender<String>, UnboundedReceiver<String>) {
            let (server_tx, to_transport) = unbounded_channel();
            let (from_transport, server_rx) = unbounded_channel();
            (
                Arc::new(MockAdapter {
                    to_transport: tokio::sync::Mutex::new(to_transport),
                    from_transport,
                }),
                server_tx,
                server_rx,
            )
        }
    }

    #[async_trait]
    impl WebSocketAdapter for MockAdapter {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, message: String) -> Result<()> {
            self.from_transport
                .send(message)
                .map_err(|_| GqlError::ConnectionFailed("mock closed".into()))
        }

        async fn receive(&self) -> Result<String> {
            self.to_transport
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| GqlError::ConnectionFailed("mock closed".into()))
        }

        async fn close(&self) {}

        async fn response_headers(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    fn new_transport() -> (Transport, UnboundedSender<String>, UnboundedReceiver<String>) {
        let (adapter, server_tx, server_rx) = MockAdapter::new();
        let transport = TransportBuilder::new()
            .ack_timeout(Duration::from_secs(1))
            .build(adapter, Box::new(TransportWsProtocol::new()));
        (transport, server_tx, server_rx)
    }

    #[tokio::test]
    async fn test_connect_waits_for_ack_then_reports_connected() {
        let (transport, server_tx, mut server_rx) = new_transport();
        let handle = tokio::spawn({
            let transport = transport.clone();
            async move { transport.connect().await }
        });

        let init_frame = server_rx.recv().await.unwrap();
        assert!(init_frame.contains("connection_init"));
        server_tx.send(json!({"type": "connection_ack"}).to_string()).unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(transport.state().await, TransportState::Connected);
    }

    #[tokio::test]
    async fn test_second_connect_is_already_connected() {
        let (transport, server_tx, mut server_rx) = new_transport();
        let t2 = transport.clone();
        let handle = tokio::spawn(async move { t2.connect().await });
        server_rx.recv().await.unwrap();
        server_tx.send(json!({"type": "connection_ack"}).to_string()).unwrap();
        handle.await.unwrap().unwrap();

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, GqlError::AlreadyConnected));
    }

    async fn connected_transport() -> (Transport, UnboundedSender<String>, UnboundedReceiver<String>) {
        let (transport, server_tx, mut server_rx) = new_transport();
        let t2 = transport.clone();
        let handle = tokio::spawn(async move { t2.connect().await });
        server_rx.recv().await.unwrap();
        server_tx.send(json!({"type": "connection_ack"}).to_string()).unwrap();
        handle.await.unwrap().unwrap();
        (transport, server_tx, server_rx)
    }

    #[tokio::test]
    async fn test_execute_is_rejected_on_a_subscriptions_only_protocol() {
        let (adapter, server_tx, mut server_rx) = MockAdapter::new();
        let transport = TransportBuilder::new()
            .ack_timeout(Duration::from_secs(1))
            .build(adapter, Box::new(crate::appsync::AppSyncProtocol::new()));
        let t2 = transport.clone();
        let handle = tokio::spawn(async move { t2.connect().await });
        server_rx.recv().await.unwrap();
        server_tx.send(json!({"type": "connection_ack"}).to_string()).unwrap();
        handle.await.unwrap().unwrap();

        let err = transport
            .execute(GraphQLRequest::new("query { hello }"))
            .await
            .unwrap_err();
        assert!(matches!(err, GqlError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_execute_returns_first_answer_without_sending_stop() {
        let (transport, server_tx, mut server_rx) = connected_transport().await;
        let req = GraphQLRequest::new("query { hello }");
        let exec = tokio::spawn({
            let transport = transport.clone();
            async move { transport.execute(req).await }
        });

        let subscribe_frame = server_rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&subscribe_frame).unwrap();
        assert_eq!(value["type"], "subscribe");
        let id = value["id"].as_str().unwrap();

        server_tx
            .send(json!({"id": id, "type": "next", "payload": {"data": {"hello": "world"}}}).to_string())
            .unwrap();

        let result = exec.await.unwrap().unwrap();
        assert_eq!(result.data, Some(json!({"hello": "world"})));

        // execute cancels without a stop frame once it has its answer.
        assert!(tokio::time::timeout(Duration::from_millis(50), server_rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_subscribe_cancellation_sends_stop() {
        let (transport, server_tx, mut server_rx) = connected_transport().await;
        let req = GraphQLRequest::new("subscription { ticks }");
        let mut stream = transport.subscribe(req).await.unwrap();

        let subscribe_frame = server_rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&subscribe_frame).unwrap();
        let id = value["id"].as_str().unwrap().to_string();

        server_tx
            .send(json!({"id": id, "type": "next", "payload": {"data": {"tick": 1}}}).to_string())
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.data, Some(json!({"tick": 1})));

        drop(stream);

        let stop_frame = tokio::time::timeout(Duration::from_millis(200), server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&stop_frame).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["id"], id);
    }
}
