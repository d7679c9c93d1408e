//! Default transport speaking Substrate JSON-RPC
//!
//! Subscription endpoints watch extrinsics with
//! `author_submitAndWatchExtrinsic`. Request-response endpoints submit with
//! `author_submitExtrinsic` and poll new blocks for the extrinsic.

use super::http::HttpRpcClient;
use super::rpc::RpcClient;
use super::websocket::{RpcSubscription, WsRpcClient};
use super::{Connector, Transport, TransportEvent, TxWatch};
use crate::error::{Result, SdkError};
use crate::tx::{ChainSchema, SignedCall, Signer, SigningContext};
use crate::types::{
    ChainProperties, Endpoint, FeeEstimate, Inclusion, RuntimeMetadata, RuntimeVersion,
    SubmitParams, TransportKind, TxStatus,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Storage key of `System.Events`
const SYSTEM_EVENTS_KEY: &str =
    "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7";

/// Per-request timeout for HTTP endpoints
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer for lifecycle notifications of one attempt
const STATUS_BUFFER: usize = 16;

/// Opens [`NodeTransport`]s, choosing WebSocket or HTTP from the endpoint scheme
pub struct NodeConnector {
    schema: Arc<dyn ChainSchema>,
    poll_interval: Duration,
}

impl NodeConnector {
    pub fn new(schema: Arc<dyn ChainSchema>) -> Self {
        Self {
            schema,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// How often HTTP endpoints are polled for inclusion
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl Connector for NodeConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        let rpc = match endpoint.kind() {
            TransportKind::Subscription => RpcClient::Ws(WsRpcClient::connect(endpoint.url()).await?),
            TransportKind::RequestResponse => {
                RpcClient::Http(HttpRpcClient::new(endpoint.url(), HTTP_REQUEST_TIMEOUT)?)
            }
        };

        Ok(Arc::new(NodeTransport {
            endpoint: endpoint.clone(),
            rpc,
            schema: Arc::clone(&self.schema),
            poll_interval: self.poll_interval,
            metadata: RwLock::new(None),
            signing_base: RwLock::new(None),
        }))
    }
}

#[derive(Debug, Clone)]
struct SigningBase {
    genesis_hash: String,
    runtime: RuntimeVersion,
}

/// Transport to one node
pub struct NodeTransport {
    endpoint: Endpoint,
    rpc: RpcClient,
    schema: Arc<dyn ChainSchema>,
    poll_interval: Duration,
    metadata: RwLock<Option<Arc<RuntimeMetadata>>>,
    signing_base: RwLock<Option<SigningBase>>,
}

impl NodeTransport {
    async fn cached_metadata(&self) -> Result<Arc<RuntimeMetadata>> {
        let cached = self.metadata.read().clone();
        if let Some(metadata) = cached {
            return Ok(metadata);
        }
        let metadata = self.fetch_metadata().await?;
        Ok(Arc::new(metadata))
    }

    async fn signing_base(&self) -> Result<SigningBase> {
        let cached = self.signing_base.read().clone();
        if let Some(base) = cached {
            return Ok(base);
        }
        let (genesis_hash, runtime) =
            tokio::try_join!(self.fetch_genesis_hash(), self.fetch_runtime_version())?;
        let base = SigningBase {
            genesis_hash,
            runtime,
        };
        *self.signing_base.write() = Some(base.clone());
        Ok(base)
    }

    async fn head_number(&self) -> Result<u64> {
        let header: Header = self.rpc.request("chain_getHeader", json!([])).await?;
        header.number()
    }
}

#[async_trait]
impl Transport for NodeTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.rpc.events()
    }

    async fn await_ready(&self) -> Result<()> {
        let health: Health = self.rpc.request("system_health", json!([])).await?;
        if health.is_syncing {
            warn!(endpoint = %self.endpoint, peers = health.peers, "node is still syncing");
        } else {
            debug!(endpoint = %self.endpoint, peers = health.peers, "node ready");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.rpc.close().await
    }

    async fn fetch_chain_name(&self) -> Result<String> {
        self.rpc.request("system_chain", json!([])).await
    }

    async fn fetch_genesis_hash(&self) -> Result<String> {
        let hash: Option<String> = self.rpc.request("chain_getBlockHash", json!([0])).await?;
        hash.ok_or_else(|| SdkError::protocol("node returned no genesis hash"))
    }

    async fn fetch_runtime_version(&self) -> Result<RuntimeVersion> {
        self.rpc.request("state_getRuntimeVersion", json!([])).await
    }

    async fn fetch_properties(&self) -> Result<ChainProperties> {
        let properties: Value = self.rpc.request("system_properties", json!([])).await?;
        Ok(ChainProperties::from_json(&properties))
    }

    async fn fetch_metadata(&self) -> Result<RuntimeMetadata> {
        let raw: String = self.rpc.request("state_getMetadata", json!([])).await?;
        let metadata = self.schema.decode_metadata(&decode_hex(&raw)?)?;
        *self.metadata.write() = Some(Arc::new(metadata.clone()));
        Ok(metadata)
    }

    async fn account_nonce(&self, address: &str) -> Result<u64> {
        self.rpc
            .request("system_accountNextIndex", json!([address]))
            .await
    }

    async fn submit_and_watch(
        &self,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        params: SubmitParams,
        cancel: CancellationToken,
    ) -> Result<TxWatch> {
        let base = self.signing_base().await?;
        let nonce = match params.nonce {
            Some(nonce) => nonce,
            None => self.account_nonce(signer.address()).await?,
        };

        let context = SigningContext {
            nonce,
            tip: params.tip.unwrap_or(0),
            genesis_hash: base.genesis_hash,
            spec_version: base.runtime.spec_version,
            transaction_version: base.runtime.transaction_version,
        };

        let extrinsic = call.encode_signed(signer, &context).map_err(|e| match e {
            SdkError::SigningFailed(_) => e,
            other => SdkError::signing(other.to_string()),
        })?;
        let tx_hash = format!("0x{}", hex::encode(self.schema.extrinsic_hash(&extrinsic)));
        let extrinsic_hex = format!("0x{}", hex::encode(&extrinsic));

        let resolver = InclusionResolver {
            rpc: Arc::new(self.rpc.clone()),
            schema: Arc::clone(&self.schema),
            metadata: self.cached_metadata().await?,
            extrinsic_hex: extrinsic_hex.clone(),
        };

        let (statuses, rx) = mpsc::channel(STATUS_BUFFER);

        match &self.rpc {
            RpcClient::Ws(ws) => {
                let subscription = ws
                    .subscribe(
                        "author_submitAndWatchExtrinsic",
                        json!([extrinsic_hex]),
                        "author_unwatchExtrinsic",
                    )
                    .await?;
                tokio::spawn(pump_subscription(subscription, resolver, statuses, cancel.clone()));
            }
            RpcClient::Http(_) => {
                let start = self.head_number().await?;
                let _: String = self
                    .rpc
                    .request("author_submitExtrinsic", json!([extrinsic_hex]))
                    .await?;
                let poller = InclusionPoller {
                    resolver,
                    interval: self.poll_interval,
                    next_number: start,
                };
                tokio::spawn(poller.run(statuses, cancel.clone()));
            }
        }

        info!(
            endpoint = %self.endpoint,
            tx_hash = %tx_hash,
            nonce,
            call = %call.label(),
            "extrinsic submitted"
        );

        Ok(TxWatch::new(tx_hash, rx, cancel))
    }

    async fn estimate_fee(&self, call: &dyn SignedCall, address: &str) -> Result<FeeEstimate> {
        let encoded = call.encode_for_fee(address)?;
        let info: Value = self
            .rpc
            .request("payment_queryInfo", json!([format!("0x{}", hex::encode(encoded))]))
            .await?;
        FeeEstimate::from_query_info(&info)
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    #[serde(default)]
    peers: u64,
    #[serde(default)]
    is_syncing: bool,
}

#[derive(Debug, Deserialize)]
struct Header {
    number: String,
}

impl Header {
    fn number(&self) -> Result<u64> {
        parse_block_number(&self.number)
    }
}

#[derive(Debug, Deserialize)]
struct SignedBlock {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
    extrinsics: Vec<String>,
}

/// Status as reported by `author_extrinsicUpdate`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ExtrinsicStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(String),
    Retracted(String),
    FinalityTimeout(String),
    Finalized(String),
    Usurped(String),
    Dropped,
    Invalid,
}

fn parse_block_number(number: &str) -> Result<u64> {
    let parsed = match number.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => number.parse(),
    };
    parsed.map_err(|_| SdkError::protocol(format!("invalid block number: {}", number)))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(value.trim_start_matches("0x"))?)
}

// ============================================================================
// Inclusion tracking
// ============================================================================

/// Chain queries used while tracking inclusion
#[async_trait]
trait BlockSource: Send + Sync {
    async fn query(&self, method: &str, params: Value) -> Result<Value>;
}

#[async_trait]
impl BlockSource for RpcClient {
    async fn query(&self, method: &str, params: Value) -> Result<Value> {
        self.request(method, params).await
    }
}

async fn fetch<T: DeserializeOwned>(source: &dyn BlockSource, method: &str, params: Value) -> Result<T> {
    let value = source.query(method, params).await?;
    serde_json::from_value(value)
        .map_err(|e| SdkError::protocol(format!("unexpected {} response: {}", method, e)))
}

/// Finds an extrinsic in a block and decodes the events it emitted
struct InclusionResolver {
    rpc: Arc<dyn BlockSource>,
    schema: Arc<dyn ChainSchema>,
    metadata: Arc<RuntimeMetadata>,
    extrinsic_hex: String,
}

impl InclusionResolver {
    /// `None` if the block does not contain the extrinsic
    async fn locate(&self, block_hash: &str) -> Result<Option<Inclusion>> {
        let block: Option<SignedBlock> = fetch(self.rpc.as_ref(), "chain_getBlock", json!([block_hash])).await?;
        let block = block.ok_or_else(|| SdkError::protocol(format!("block {} not found", block_hash)))?;

        let Some(index) = block
            .block
            .extrinsics
            .iter()
            .position(|x| x.eq_ignore_ascii_case(&self.extrinsic_hex))
        else {
            return Ok(None);
        };

        let raw: Option<String> = fetch(
            self.rpc.as_ref(),
            "state_getStorage",
            json!([SYSTEM_EVENTS_KEY, block_hash]),
        )
        .await?;
        let events = match raw {
            Some(raw) => self
                .schema
                .decode_events(&decode_hex(&raw)?, &self.metadata, index as u32)?,
            None => Vec::new(),
        };

        Ok(Some(Inclusion {
            block_hash: block_hash.to_string(),
            block_number: Some(block.block.header.number()?),
            events,
        }))
    }

    async fn resolve(&self, block_hash: &str) -> Result<Inclusion> {
        self.locate(block_hash).await?.ok_or_else(|| {
            SdkError::protocol(format!("extrinsic not found in block {}", block_hash))
        })
    }
}

/// Forward `author_extrinsicUpdate` notifications until the stream ends or the attempt is cancelled
async fn pump_subscription(
    mut subscription: RpcSubscription,
    resolver: InclusionResolver,
    statuses: mpsc::Sender<TxStatus>,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => match next {
                Some(raw) => raw,
                None => break,
            },
        };

        let status = match serde_json::from_value::<ExtrinsicStatus>(raw) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "unrecognised extrinsic status");
                continue;
            }
        };

        let finalized = matches!(status, ExtrinsicStatus::Finalized(_));
        let status = match status {
            ExtrinsicStatus::Future => TxStatus::Future,
            ExtrinsicStatus::Ready => TxStatus::Ready,
            ExtrinsicStatus::Broadcast(peers) => TxStatus::Broadcast(peers),
            ExtrinsicStatus::Retracted(hash) => TxStatus::Retracted(hash),
            ExtrinsicStatus::FinalityTimeout(hash) => TxStatus::FinalityTimeout(hash),
            ExtrinsicStatus::Usurped(hash) => TxStatus::Usurped(hash),
            ExtrinsicStatus::Dropped => TxStatus::Dropped,
            ExtrinsicStatus::Invalid => TxStatus::Invalid,
            ExtrinsicStatus::InBlock(hash) | ExtrinsicStatus::Finalized(hash) => {
                let resolved = tokio::select! {
                    _ = cancel.cancelled() => break,
                    resolved = resolver.resolve(&hash) => resolved,
                };
                match resolved {
                    Ok(inclusion) if finalized => TxStatus::Finalized(inclusion),
                    Ok(inclusion) => TxStatus::InBlock(inclusion),
                    Err(e) => {
                        // Closing the channel surfaces as a retryable network error
                        warn!(block = %hash, error = %e, "failed to resolve inclusion");
                        break;
                    }
                }
            }
        };

        if statuses.send(status).await.is_err() {
            break;
        }
    }

    let id = subscription.id();
    if let Err(e) = subscription.unsubscribe().await {
        debug!(subscription = %id, error = %e, "unsubscribe failed");
    }
}

/// Emulates lifecycle notifications for request-response endpoints
struct InclusionPoller {
    resolver: InclusionResolver,
    interval: Duration,
    next_number: u64,
}

impl InclusionPoller {
    async fn run(mut self, statuses: mpsc::Sender<TxStatus>, cancel: CancellationToken) {
        if statuses.send(TxStatus::Ready).await.is_err() {
            return;
        }

        let mut included: Option<Inclusion> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let step = match &included {
                None => self.scan().await.map(|found| found.map(TxStatus::InBlock)),
                Some(inclusion) => self.check_finality(inclusion).await,
            };

            match step {
                Ok(Some(status)) => {
                    included = match &status {
                        TxStatus::InBlock(inclusion) => Some(inclusion.clone()),
                        TxStatus::Retracted(_) => None,
                        _ => included,
                    };
                    let done = matches!(status, TxStatus::Finalized(_));
                    if statuses.send(status).await.is_err() || done {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "inclusion polling failed");
                    return;
                }
            }
        }
    }

    /// Look for the extrinsic in blocks produced since the last scan
    async fn scan(&mut self) -> Result<Option<Inclusion>> {
        let rpc = self.resolver.rpc.as_ref();
        let header: Header = fetch(rpc, "chain_getHeader", json!([])).await?;
        let head = header.number()?;

        while self.next_number <= head {
            let number = self.next_number;
            let hash: Option<String> = fetch(rpc, "chain_getBlockHash", json!([number])).await?;
            self.next_number += 1;

            if let Some(hash) = hash {
                if let Some(inclusion) = self.resolver.locate(&hash).await? {
                    return Ok(Some(inclusion));
                }
            }
        }
        Ok(None)
    }

    async fn check_finality(&mut self, inclusion: &Inclusion) -> Result<Option<TxStatus>> {
        let Some(number) = inclusion.block_number else {
            return Ok(None);
        };

        let rpc = self.resolver.rpc.as_ref();
        let finalized_hash: String = fetch(rpc, "chain_getFinalizedHead", json!([])).await?;
        let finalized: Header = fetch(rpc, "chain_getHeader", json!([finalized_hash])).await?;
        if finalized.number()? < number {
            return Ok(None);
        }

        let canonical: Option<String> = fetch(rpc, "chain_getBlockHash", json!([number])).await?;
        if canonical.as_deref() == Some(inclusion.block_hash.as_str()) {
            Ok(Some(TxStatus::Finalized(inclusion.clone())))
        } else {
            // Our block lost the fork; rescan from its height
            self.next_number = number;
            Ok(Some(TxStatus::Retracted(inclusion.block_hash.clone())))
        }
    }
}
