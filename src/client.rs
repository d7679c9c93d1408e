//! ChainClient - Main SDK entry point
//!
//! # Example
//!
//! ```rust,no_run
//! use chain_session_sdk::{ChainClient, ChainSchema, Config, TxOptions};
//! use std::sync::Arc;
//!
//! # async fn run(schema: Arc<dyn ChainSchema>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder()
//!     .endpoint("wss://rpc-a.example.org")
//!     .endpoint("wss://rpc-b.example.org")
//!     .build()?;
//!
//! let client = ChainClient::connect_default(config, schema).await?;
//!
//! let mut events = client.subscribe_events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("connection event: {:?}", event);
//!     }
//! });
//!
//! println!("connected: {:?}", client.status());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::connection::{
    ConnectSettings, ConnectionManager, Connector, NodeConnector, ReconnectCoordinator,
};
use crate::error::{Result, SdkError};
use crate::events::{ConnectionEvent, EventHub};
use crate::session::Session;
use crate::tx::{ChainSchema, FeeEstimator, SignedCall, Signer, TransactionExecutor};
use crate::types::{ConnectionStatus, FeeEstimate, TransactionResult, TxOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Chain client with automatic failover and transaction tracking
pub struct ChainClient {
    config: Config,
    manager: ConnectionManager,
    coordinator: ReconnectCoordinator,
    executor: TransactionExecutor,
    fees: FeeEstimator,
    coordinator_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChainClient {
    /// Create a client without connecting
    ///
    /// Must be called within a tokio runtime; the reconnect coordinator is
    /// spawned immediately.
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let events = EventHub::new();
        let (manager, notices) = ConnectionManager::new(
            connector,
            config.endpoints.clone(),
            ConnectSettings::from(&config),
            events,
        );

        let coordinator = ReconnectCoordinator::new(manager.clone(), config.reconnect_delay);
        let coordinator_task = coordinator.clone().spawn(notices);

        let fees = FeeEstimator::new(config.connection_timeout);
        let executor = TransactionExecutor::new(manager.clone(), fees);

        Ok(Self {
            config,
            manager,
            coordinator,
            executor,
            fees,
            coordinator_task: Mutex::new(Some(coordinator_task)),
        })
    }

    /// Connect using the built-in JSON-RPC node transport
    pub async fn connect_default(config: Config, schema: Arc<dyn ChainSchema>) -> Result<Self> {
        let connector = NodeConnector::new(schema).poll_interval(config.poll_interval);
        let client = Self::new(config, Arc::new(connector))?;
        client.connect().await?;
        Ok(client)
    }

    /// Establish a session, or return the live one
    pub async fn connect(&self) -> Result<Arc<Session>> {
        info!(endpoints = self.config.endpoints.len(), "connecting");
        self.manager.connect().await
    }

    /// Rotate away from the current endpoint and connect again
    ///
    /// Fails with [`SdkError::AlreadyConnecting`] while another attempt runs.
    pub async fn reconnect(&self) -> Result<Arc<Session>> {
        if self.manager.is_closed() {
            return Err(SdkError::NotConnected);
        }
        self.coordinator.reconnect_now().await
    }

    /// Disconnect and stop automatic reconnection
    ///
    /// Dropping the client also disconnects, without reporting errors.
    pub async fn close(&self) -> Result<()> {
        debug!("closing client");
        self.manager.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// The live session
    pub fn session(&self) -> Result<Arc<Session>> {
        self.manager.current_session()
    }

    /// Subscribe to connection events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.events().subscribe()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-call options seeded from the configured retry policy
    pub fn tx_options(&self) -> TxOptions {
        TxOptions::from_policy(&self.config.retry)
    }

    /// Submit a signed call and wait for its outcome
    ///
    /// Connects first when no session is live, unless the client was closed.
    pub async fn execute(
        &self,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        options: TxOptions,
    ) -> Result<TransactionResult> {
        self.ensure_connected().await?;
        self.executor.execute(call, signer, &options).await
    }

    /// Estimate the fee of a call; `None` if the node cannot tell
    pub async fn estimate_fee(&self, call: &dyn SignedCall, address: &str) -> Result<Option<FeeEstimate>> {
        let session = self.ensure_connected().await?;
        Ok(self
            .fees
            .estimate(session.transport().as_ref(), call, address)
            .await)
    }

    async fn ensure_connected(&self) -> Result<Arc<Session>> {
        match self.manager.current_session() {
            Ok(session) => Ok(session),
            Err(e) if self.manager.is_closed() => Err(e),
            Err(_) => self.manager.join_or_start().await,
        }
    }
}

impl Drop for ChainClient {
    fn drop(&mut self) {
        if let Some(task) = self.coordinator_task.lock().take() {
            task.abort();
        }

        // Best effort; `close()` is the way to observe teardown errors
        let Some(session) = self.manager.detach() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            debug!(endpoint = %session.endpoint(), "disconnecting dropped client");
            runtime.spawn(async move {
                let _ = session.transport().disconnect().await;
            });
        }
    }
}
