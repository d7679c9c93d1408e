//! HTTP JSON-RPC client using reqwest
//!
//! Request-response endpoints cannot push notifications, so lifecycle
//! tracking over HTTP is done by polling (see the node transport).

use super::rpc::{RpcMessage, RpcRequest};
use super::TransportEvent;
use crate::error::{Result, SdkError};
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// HTTP JSON-RPC client
#[derive(Clone)]
pub struct HttpRpcClient {
    client: Client,
    url: String,
    request_counter: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl HttpRpcClient {
    /// Create a client; no request is made until the first call
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SdkError::connection(format!("failed to create HTTP client: {}", e)))?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            client,
            url: url.to_string(),
            request_counter: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(AtomicBool::new(true)),
            events,
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(SdkError::NotConnected);
        }

        let id = self.request_counter.fetch_add(1, Ordering::Relaxed);
        trace!(url = %self.url, id, method, "sending HTTP request");

        let response = self
            .client
            .post(&self.url)
            .json(&RpcRequest::new(id, method, params))
            .send()
            .await
            .map_err(|e| {
                let error = SdkError::from(e);
                if matches!(error, SdkError::Connection(_)) {
                    self.mark_lost(&error);
                }
                error
            })?;

        if !response.status().is_success() {
            return Err(SdkError::network(format!(
                "{} returned HTTP {} for {}",
                self.url,
                response.status(),
                method
            )));
        }

        let message: RpcMessage = response.json().await?;
        message.into_outcome()
    }

    fn mark_lost(&self, error: &SdkError) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(url = %self.url, error = %error, "HTTP endpoint unreachable");
            let _ = self.events.send(TransportEvent::Error(error.to_string()));
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(url = %self.url, "HTTP client closed");
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }
}
