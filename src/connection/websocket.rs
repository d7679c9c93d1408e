//! WebSocket JSON-RPC client using tokio-tungstenite
//!
//! One socket carries every request and subscription. A receiver task routes
//! responses to their callers by request id and notifications to their
//! subscription by subscription id.

use super::rpc::{subscription_key, RpcMessage, RpcRequest};
use super::TransportEvent;
use crate::error::{Result, SdkError};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

struct PendingCall {
    reply: oneshot::Sender<Result<Value>>,
    /// Set for subscribe calls; registered under the returned subscription id
    subscription: Option<mpsc::UnboundedSender<Value>>,
}

struct WsShared {
    endpoint: String,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl WsShared {
    fn dispatch(&self, text: &str) {
        let message: RpcMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to parse server message");
                return;
            }
        };

        if let Some(params) = message.params {
            let key = subscription_key(&params.subscription);
            let sender = self.subscriptions.lock().get(&key).cloned();
            match sender {
                Some(sender) => {
                    if sender.send(params.result).is_err() {
                        trace!(subscription = %key, "subscriber gone");
                    }
                }
                None => trace!(subscription = %key, "notification for unknown subscription"),
            }
            return;
        }

        let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
            trace!("frame without numeric id ignored");
            return;
        };
        let Some(call) = self.pending.lock().remove(&id) else {
            trace!(id, "response for unknown request");
            return;
        };

        let outcome = message.into_outcome();
        if let (Ok(subscription_id), Some(sender)) = (&outcome, call.subscription) {
            self.subscriptions
                .lock()
                .insert(subscription_key(subscription_id), sender);
        }
        let _ = call.reply.send(outcome);
    }

    /// Fail everything outstanding; emits `Disconnected` once
    fn shutdown(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, call) in pending {
            let _ = call
                .reply
                .send(Err(SdkError::network(format!("connection to {} closed", self.endpoint))));
        }
        self.subscriptions.lock().clear();

        if was_connected {
            debug!(endpoint = %self.endpoint, "WebSocket disconnected");
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }
}

/// WebSocket JSON-RPC client
#[derive(Clone)]
pub struct WsRpcClient {
    shared: Arc<WsShared>,
}

impl WsRpcClient {
    /// Open the socket and start the receiver task
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(endpoint = %url, "connecting via WebSocket");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SdkError::connection(format!("WebSocket connection to {} failed: {}", url, e)))?;

        let (sink, stream) = ws_stream.split();
        let (events, _) = broadcast::channel(16);

        let shared = Arc::new(WsShared {
            endpoint: url.to_string(),
            sink: tokio::sync::Mutex::new(Some(sink)),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            events,
        });

        Self::spawn_receiver(stream, Arc::clone(&shared));
        let _ = shared.events.send(TransportEvent::Connected);

        Ok(Self { shared })
    }

    fn spawn_receiver(mut stream: WsStream, shared: Arc<WsShared>) {
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let mut sink_guard = shared.sink.lock().await;
                        if let Some(s) = sink_guard.as_mut() {
                            let _ = s.send(Message::Pong(data)).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(endpoint = %shared.endpoint, "WebSocket connection closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(endpoint = %shared.endpoint, error = %e, "WebSocket receive error");
                        let _ = shared.events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        debug!(endpoint = %shared.endpoint, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            shared.shutdown();
        });
    }

    async fn send(&self, request: &RpcRequest<'_>) -> Result<()> {
        let json = serde_json::to_string(request)?;

        let mut sink_guard = self.shared.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SdkError::NotConnected)?;

        sink.send(Message::Text(json))
            .await
            .map_err(|e| SdkError::network(format!("failed to send request: {}", e)))
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        subscription: Option<mpsc::UnboundedSender<Value>>,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(SdkError::NotConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(id, PendingCall { reply, subscription });

        trace!(id, method, "sending request");
        if let Err(e) = self.send(&RpcRequest::new(id, method, params)).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        response
            .await
            .map_err(|_| SdkError::network(format!("connection closed while waiting for {}", method)))?
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.call(method, params, None).await
    }

    /// Start a subscription; notifications arrive on the returned handle
    pub async fn subscribe(
        &self,
        method: &str,
        params: Value,
        unsubscribe_method: &'static str,
    ) -> Result<RpcSubscription> {
        let (sender, notifications) = mpsc::unbounded_channel();
        let id = self.call(method, params, Some(sender)).await?;
        debug!(method, subscription = %subscription_key(&id), "subscribed");

        Ok(RpcSubscription {
            client: self.clone(),
            id,
            unsubscribe_method,
            notifications,
        })
    }

    async fn unsubscribe(&self, method: &str, id: &Value) -> Result<()> {
        self.shared.subscriptions.lock().remove(&subscription_key(id));
        if !self.is_connected() {
            return Ok(());
        }
        self.request(method, json!([id])).await.map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Close the socket
    pub async fn close(&self) -> Result<()> {
        let sink = self.shared.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing WebSocket");
            }
        }
        self.shared.shutdown();
        Ok(())
    }
}

/// A live server-side subscription
pub struct RpcSubscription {
    client: WsRpcClient,
    id: Value,
    unsubscribe_method: &'static str,
    notifications: mpsc::UnboundedReceiver<Value>,
}

impl RpcSubscription {
    /// Next notification; `None` when the connection is gone
    pub async fn next(&mut self) -> Option<Value> {
        self.notifications.recv().await
    }

    pub fn id(&self) -> String {
        subscription_key(&self.id)
    }

    /// Tell the node to stop sending notifications
    pub async fn unsubscribe(self) -> Result<()> {
        self.client
            .unsubscribe(self.unsubscribe_method, &self.id)
            .await
    }
}
