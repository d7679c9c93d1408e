//! Connection management and node transports
//!
//! This module provides the transport abstraction the engine orchestrates,
//! the connection manager and reconnect coordinator built on top of it, and
//! the default JSON-RPC node transport.

pub mod http;
pub mod manager;
pub mod node;
pub mod reconnect;
pub mod rpc;
pub mod websocket;

pub use manager::{ConnectSettings, ConnectionManager, DisconnectNotice, EndpointPool};
pub use node::NodeConnector;
pub use reconnect::ReconnectCoordinator;

use crate::error::Result;
use crate::tx::{SignedCall, Signer};
use crate::types::{
    ChainProperties, Endpoint, FeeEstimate, RuntimeMetadata, RuntimeVersion, SubmitParams, TxStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Low-level connection notifications raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// Opens transports to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport; the caller bounds this with the connection timeout
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>>;
}

/// A connected channel to one node
#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint this transport was opened against
    fn endpoint(&self) -> &Endpoint;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Subscribe to connection events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Resolve once the node answers requests
    async fn await_ready(&self) -> Result<()>;

    /// Disconnect from the node
    async fn disconnect(&self) -> Result<()>;

    async fn fetch_chain_name(&self) -> Result<String>;

    async fn fetch_genesis_hash(&self) -> Result<String>;

    async fn fetch_runtime_version(&self) -> Result<RuntimeVersion>;

    async fn fetch_properties(&self) -> Result<ChainProperties>;

    async fn fetch_metadata(&self) -> Result<RuntimeMetadata>;

    /// Next usable nonce of `address`, counting transactions already in the pool
    async fn account_nonce(&self, address: &str) -> Result<u64>;

    /// Sign, submit and watch a call
    ///
    /// Without `params.nonce` the transport asks the node for one.
    ///
    /// The returned watch yields lifecycle notifications until the node stops
    /// reporting or `cancel` fires. Cancelling must release the node-side
    /// subscription.
    async fn submit_and_watch(
        &self,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        params: SubmitParams,
        cancel: CancellationToken,
    ) -> Result<TxWatch>;

    /// Query the partial fee and weight of a call
    async fn estimate_fee(&self, call: &dyn SignedCall, address: &str) -> Result<FeeEstimate>;
}

/// Lifecycle notifications for one submission attempt
///
/// Dropping the watch cancels its token, which tears down the subscription.
#[derive(Debug)]
pub struct TxWatch {
    tx_hash: String,
    statuses: mpsc::Receiver<TxStatus>,
    cancel: CancellationToken,
}

impl TxWatch {
    pub fn new(
        tx_hash: impl Into<String>,
        statuses: mpsc::Receiver<TxStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            statuses,
            cancel,
        }
    }

    /// Hash of the submitted extrinsic
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    /// Next notification, or `None` once the stream ends
    pub async fn next(&mut self) -> Option<TxStatus> {
        self.statuses.recv().await
    }

    /// Release the subscription
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TxWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tx_watch_yields_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut watch = TxWatch::new("0xabc", rx, CancellationToken::new());
        tx.send(TxStatus::Ready).await.unwrap();
        drop(tx);

        assert_eq!(watch.tx_hash(), "0xabc");
        assert_eq!(watch.next().await, Some(TxStatus::Ready));
        assert_eq!(watch.next().await, None);
    }

    #[test]
    fn test_tx_watch_drop_cancels() {
        let token = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);
        let watch = TxWatch::new("0xabc", rx, token.clone());
        assert!(!token.is_cancelled());
        drop(watch);
        assert!(token.is_cancelled());
    }
}
