//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chain_session_sdk::{
    ChainClient, ChainEvent, ChainProperties, Config, ConnectionEvent, Connector, DispatchFailure,
    Endpoint, ErrorMetadata, FeeEstimate, Inclusion, PalletMetadata, Result, RuntimeMetadata,
    RuntimeVersion, SdkError, SignedCall, Signer, SigningContext, SubmitParams, Transport,
    TransportEvent, TxStatus, TxWatch,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// How an endpoint reacts to `open`
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Fail,
    Hang,
    SucceedAfter(Duration),
}

/// What one submission attempt does
#[derive(Debug, Clone)]
pub enum AttemptScript {
    /// Emit these statuses, then stay open until cancelled
    Statuses(Vec<TxStatus>),
    /// Fail the submit call itself
    SubmitError(SdkError),
    /// Accept the submission but never report anything
    Silent,
    /// Emit these statuses, then close the stream as a lost node would
    EndAfter(Vec<TxStatus>),
}

#[derive(Default)]
pub struct MockState {
    behaviors: Mutex<HashMap<String, Behavior>>,
    opens: Mutex<Vec<String>>,
    attempts: Mutex<VecDeque<AttemptScript>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    metadata: Mutex<RuntimeMetadata>,
    fee: Mutex<Option<std::result::Result<FeeEstimate, SdkError>>>,
    spec_version: AtomicU32,
    submissions: AtomicU32,
    unsubscribes: AtomicU32,
    nonce_queries: AtomicU32,
    nonces: Mutex<Vec<Option<u64>>>,
}

pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        let state = MockState::default();
        *state.metadata.lock() = balances_metadata();
        state.spec_version.store(100, Ordering::SeqCst);
        Arc::new(Self {
            state: Arc::new(state),
        })
    }

    pub fn set(&self, url: &str, behavior: Behavior) {
        self.state.behaviors.lock().insert(url.to_string(), behavior);
    }

    pub fn opens(&self) -> Vec<String> {
        self.state.opens.lock().clone()
    }

    pub fn script(&self, attempts: Vec<AttemptScript>) {
        self.state.attempts.lock().extend(attempts);
    }

    pub fn set_fee(&self, fee: std::result::Result<FeeEstimate, SdkError>) {
        *self.state.fee.lock() = Some(fee);
    }

    pub fn set_spec_version(&self, version: u32) {
        self.state.spec_version.store(version, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> u32 {
        self.state.submissions.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> u32 {
        self.state.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn nonce_queries(&self) -> u32 {
        self.state.nonce_queries.load(Ordering::SeqCst)
    }

    /// Nonce passed with each submission, in order
    pub fn nonces(&self) -> Vec<Option<u64>> {
        self.state.nonces.lock().clone()
    }

    /// Most recently opened transport for `url`
    pub fn transport(&self, url: &str) -> Arc<MockTransport> {
        self.state
            .transports
            .lock()
            .iter()
            .rev()
            .find(|t| t.endpoint.url() == url)
            .cloned()
            .expect("no transport opened for url")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        let url = endpoint.url().to_string();
        self.state.opens.lock().push(url.clone());

        let behavior = self
            .state
            .behaviors
            .lock()
            .get(&url)
            .copied()
            .unwrap_or(Behavior::SucceedAfter(Duration::ZERO));

        match behavior {
            Behavior::Fail => Err(SdkError::connection(format!("connection refused: {}", url))),
            Behavior::Hang => std::future::pending().await,
            Behavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                let (events, _) = broadcast::channel(16);
                let transport = Arc::new(MockTransport {
                    endpoint: endpoint.clone(),
                    connected: AtomicBool::new(true),
                    events,
                    state: Arc::clone(&self.state),
                });
                self.state.transports.lock().push(Arc::clone(&transport));
                Ok(transport)
            }
        }
    }
}

pub struct MockTransport {
    endpoint: Endpoint,
    connected: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<MockState>,
}

impl MockTransport {
    /// Simulate the node going away
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn await_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_connection();
        Ok(())
    }

    async fn fetch_chain_name(&self) -> Result<String> {
        Ok("Testnet".to_string())
    }

    async fn fetch_genesis_hash(&self) -> Result<String> {
        Ok("0x91b171bb158e2d3848fa23a9f1c25182".to_string())
    }

    async fn fetch_runtime_version(&self) -> Result<RuntimeVersion> {
        Ok(RuntimeVersion {
            spec_name: "node".to_string(),
            impl_name: "node".to_string(),
            spec_version: self.state.spec_version.load(Ordering::SeqCst),
            impl_version: 1,
            transaction_version: 1,
        })
    }

    async fn fetch_properties(&self) -> Result<ChainProperties> {
        Ok(ChainProperties {
            ss58_format: Some(42),
            token_decimals: Some(12),
            token_symbol: Some("UNIT".to_string()),
        })
    }

    async fn fetch_metadata(&self) -> Result<RuntimeMetadata> {
        Ok(self.state.metadata.lock().clone())
    }

    async fn account_nonce(&self, _address: &str) -> Result<u64> {
        // The node's view moves on once a transaction is pooled
        let queries = self.state.nonce_queries.fetch_add(1, Ordering::SeqCst);
        Ok(41 + u64::from(queries))
    }

    async fn submit_and_watch(
        &self,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        params: SubmitParams,
        cancel: CancellationToken,
    ) -> Result<TxWatch> {
        let number = self.state.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.nonces.lock().push(params.nonce);
        let context = SigningContext {
            nonce: params.nonce.unwrap_or(u64::from(number)),
            tip: params.tip.unwrap_or(0),
            genesis_hash: self.fetch_genesis_hash().await?,
            spec_version: 100,
            transaction_version: 1,
        };
        call.encode_signed(signer, &context)?;

        let script = self
            .state
            .attempts
            .lock()
            .pop_front()
            .unwrap_or_else(|| AttemptScript::Statuses(vec![TxStatus::Ready, in_block(success_inclusion("0xb1"))]));

        let (statuses, hold_open) = match script {
            AttemptScript::SubmitError(e) => return Err(e),
            AttemptScript::Statuses(statuses) => (statuses, true),
            AttemptScript::Silent => (Vec::new(), true),
            AttemptScript::EndAfter(statuses) => (statuses, false),
        };

        let (tx, rx) = mpsc::channel(32);
        let state = Arc::clone(&self.state);
        let token = cancel.clone();
        tokio::spawn(async move {
            for status in statuses {
                if tx.send(status).await.is_err() {
                    break;
                }
            }
            let held = hold_open.then_some(tx);
            token.cancelled().await;
            state.unsubscribes.fetch_add(1, Ordering::SeqCst);
            drop(held);
        });

        Ok(TxWatch::new(format!("0x{:064x}", number), rx, cancel))
    }

    async fn estimate_fee(&self, _call: &dyn SignedCall, _address: &str) -> Result<FeeEstimate> {
        self.state
            .fee
            .lock()
            .clone()
            .unwrap_or_else(|| Err(SdkError::network("fee query unavailable")))
    }
}

/// A call that encodes to fixed bytes
pub struct TestCall {
    pallet: String,
    call: String,
}

impl TestCall {
    pub fn new(pallet: &str, call: &str) -> Self {
        Self {
            pallet: pallet.to_string(),
            call: call.to_string(),
        }
    }

    pub fn transfer() -> Self {
        Self::new("Balances", "transfer_keep_alive")
    }
}

impl SignedCall for TestCall {
    fn pallet(&self) -> &str {
        &self.pallet
    }

    fn call_name(&self) -> &str {
        &self.call
    }

    fn encode_signed(&self, signer: &dyn Signer, context: &SigningContext) -> Result<Vec<u8>> {
        let mut bytes = signer.sign(&context.nonce.to_le_bytes())?;
        bytes.extend_from_slice(self.call.as_bytes());
        Ok(bytes)
    }

    fn encode_for_fee(&self, _address: &str) -> Result<Vec<u8>> {
        Ok(self.call.as_bytes().to_vec())
    }
}

pub struct TestSigner {
    usable: bool,
}

impl TestSigner {
    pub fn new() -> Self {
        Self { usable: true }
    }

    pub fn locked() -> Self {
        Self { usable: false }
    }
}

impl Signer for TestSigner {
    fn address(&self) -> &str {
        "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"
    }

    fn is_usable(&self) -> bool {
        self.usable
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.usable {
            return Err(SdkError::signing("key is locked"));
        }
        Ok(payload.to_vec())
    }
}

pub fn balances_metadata() -> RuntimeMetadata {
    RuntimeMetadata {
        pallets: vec![
            PalletMetadata {
                index: 0,
                name: "System".into(),
                calls: vec!["remark".into()],
                errors: vec![],
            },
            PalletMetadata {
                index: 5,
                name: "Balances".into(),
                calls: vec!["transfer_keep_alive".into(), "transfer_all".into()],
                errors: vec![
                    ErrorMetadata {
                        name: "VestingBalance".into(),
                        docs: vec!["Vesting balance too high to send value.".into()],
                    },
                    ErrorMetadata {
                        name: "InsufficientBalance".into(),
                        docs: vec!["Balance too low to send value.".into()],
                    },
                ],
            },
        ],
    }
}

pub fn success_inclusion(block: &str) -> Inclusion {
    Inclusion {
        block_hash: block.to_string(),
        block_number: Some(12),
        events: vec![
            ChainEvent::new("Balances", "Transfer"),
            ChainEvent::new("System", "ExtrinsicSuccess"),
        ],
    }
}

pub fn module_error_inclusion(block: &str) -> Inclusion {
    Inclusion {
        block_hash: block.to_string(),
        block_number: Some(12),
        events: vec![ChainEvent::new("System", "ExtrinsicFailed").with_dispatch_error(
            DispatchFailure::Module {
                pallet_index: 5,
                error_index: 1,
            },
        )],
    }
}

pub fn in_block(inclusion: Inclusion) -> TxStatus {
    TxStatus::InBlock(inclusion)
}

pub fn finalized(inclusion: Inclusion) -> TxStatus {
    TxStatus::Finalized(inclusion)
}

pub fn config(urls: &[&str], rounds: u32) -> Config {
    Config::builder()
        .endpoints(urls.iter().copied())
        .connection_timeout(Duration::from_millis(100))
        .reconnect_delay(Duration::from_millis(50))
        .max_reconnect_rounds(rounds)
        .build()
        .unwrap()
}

pub fn client(connector: &Arc<MockConnector>, urls: &[&str], rounds: u32) -> ChainClient {
    ChainClient::new(config(urls, rounds), connector.clone()).unwrap()
}

pub async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
