//! Data types shared by the connection engine and the transaction executor

use crate::error::{ErrorCode, Result, SdkError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// How a node endpoint is spoken to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent connection with server-pushed subscriptions (ws, wss)
    Subscription,
    /// Plain request/response (http, https)
    RequestResponse,
}

/// Address of a candidate node plus the transport kind inferred from its scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    url: String,
    kind: TransportKind,
}

impl Endpoint {
    /// Parse an endpoint URL, inferring the transport kind from its scheme
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let kind = if url.starts_with("ws://") || url.starts_with("wss://") {
            TransportKind::Subscription
        } else if url.starts_with("http://") || url.starts_with("https://") {
            TransportKind::RequestResponse
        } else {
            return Err(SdkError::config(format!(
                "unsupported endpoint scheme: {}",
                url
            )));
        };

        if url.split("://").nth(1).map_or(true, str::is_empty) {
            return Err(SdkError::config(format!("endpoint has no host: {}", url)));
        }

        Ok(Self {
            url: url.to_string(),
            kind,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn supports_subscriptions(&self) -> bool {
        self.kind == TransportKind::Subscription
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl FromStr for Endpoint {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

// ============================================================================
// Chain information
// ============================================================================

/// Runtime version reported by `state_getRuntimeVersion`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_name: String,
    #[serde(default)]
    pub impl_name: String,
    pub spec_version: u32,
    #[serde(default)]
    pub impl_version: u32,
    #[serde(default)]
    pub transaction_version: u32,
}

/// Token and address-format properties reported by `system_properties`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProperties {
    pub ss58_format: Option<u16>,
    pub token_decimals: Option<u32>,
    pub token_symbol: Option<String>,
}

impl ChainProperties {
    /// Parse the loosely-typed properties object
    ///
    /// Multi-token chains report decimals and symbols as arrays; the first
    /// entry is the native token.
    pub fn from_json(value: &Value) -> Self {
        fn first(value: Option<&Value>) -> Option<&Value> {
            match value? {
                Value::Array(items) => items.first(),
                Value::Null => None,
                other => Some(other),
            }
        }

        Self {
            ss58_format: first(value.get("ss58Format"))
                .and_then(Value::as_u64)
                .and_then(|v| u16::try_from(v).ok()),
            token_decimals: first(value.get("tokenDecimals"))
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok()),
            token_symbol: first(value.get("tokenSymbol"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Chain metadata cached in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// Chain name (`system_chain`)
    pub chain: String,
    /// Hash of block zero
    pub genesis_hash: String,
    pub runtime: RuntimeVersion,
    pub properties: ChainProperties,
}

impl ChainInfo {
    pub fn token_decimals(&self) -> Option<u32> {
        self.properties.token_decimals
    }

    pub fn token_symbol(&self) -> Option<&str> {
        self.properties.token_symbol.as_deref()
    }
}

// ============================================================================
// Runtime metadata (decoded form)
// ============================================================================

/// A pallet error with its documentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub name: String,
    #[serde(default)]
    pub docs: Vec<String>,
}

/// The parts of a pallet this engine needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletMetadata {
    pub index: u8,
    pub name: String,
    #[serde(default)]
    pub calls: Vec<String>,
    /// Errors in declaration order; position is the error index
    #[serde(default)]
    pub errors: Vec<ErrorMetadata>,
}

/// Runtime metadata as produced by a [`ChainSchema`](crate::tx::ChainSchema)
///
/// Names are matched ignoring case and underscores, so `balances` /
/// `transferKeepAlive` find `Balances` / `transfer_keep_alive`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMetadata {
    pub pallets: Vec<PalletMetadata>,
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl RuntimeMetadata {
    /// True when no schema information is available
    pub fn is_empty(&self) -> bool {
        self.pallets.is_empty()
    }

    pub fn pallet(&self, name: &str) -> Option<&PalletMetadata> {
        let wanted = normalize_name(name);
        self.pallets.iter().find(|p| normalize_name(&p.name) == wanted)
    }

    pub fn has_call(&self, pallet: &str, call: &str) -> bool {
        let wanted = normalize_name(call);
        self.pallet(pallet)
            .map(|p| p.calls.iter().any(|c| normalize_name(c) == wanted))
            .unwrap_or(false)
    }

    /// Look up a module error by pallet index and error index
    pub fn module_error(
        &self,
        pallet_index: u8,
        error_index: u8,
    ) -> Option<(&PalletMetadata, &ErrorMetadata)> {
        let pallet = self.pallets.iter().find(|p| p.index == pallet_index)?;
        let error = pallet.errors.get(usize::from(error_index))?;
        Some((pallet, error))
    }
}

// ============================================================================
// Events and lifecycle notifications
// ============================================================================

/// Raw dispatch failure carried by an `ExtrinsicFailed` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchFailure {
    /// Error raised by a specific pallet
    Module { pallet_index: u8, error_index: u8 },
    /// Any other rejection (bad origin, arithmetic, token, ...)
    Other { message: String },
}

/// A decoded runtime event emitted by an extrinsic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub pallet: String,
    pub method: String,
    #[serde(default)]
    pub data: Value,
    /// Set by the schema for `System.ExtrinsicFailed`
    #[serde(default)]
    pub dispatch_error: Option<DispatchFailure>,
}

impl ChainEvent {
    pub fn new(pallet: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            pallet: pallet.into(),
            method: method.into(),
            data: Value::Null,
            dispatch_error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_dispatch_error(mut self, failure: DispatchFailure) -> Self {
        self.dispatch_error = Some(failure);
        self
    }

    fn is_system(&self, method: &str) -> bool {
        self.pallet.eq_ignore_ascii_case("system") && self.method == method
    }

    pub fn is_extrinsic_success(&self) -> bool {
        self.is_system("ExtrinsicSuccess")
    }

    pub fn is_extrinsic_failed(&self) -> bool {
        self.is_system("ExtrinsicFailed")
    }
}

/// Where a call landed
#[derive(Debug, Clone, PartialEq)]
pub struct Inclusion {
    pub block_hash: String,
    pub block_number: Option<u64>,
    /// Events emitted by this extrinsic only
    pub events: Vec<ChainEvent>,
}

/// Lifecycle notification for a submitted call
#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(Inclusion),
    Retracted(String),
    FinalityTimeout(String),
    Finalized(Inclusion),
    Usurped(String),
    Dropped,
    Invalid,
}

impl TxStatus {
    pub fn name(&self) -> &'static str {
        match self {
            TxStatus::Future => "future",
            TxStatus::Ready => "ready",
            TxStatus::Broadcast(_) => "broadcast",
            TxStatus::InBlock(_) => "in_block",
            TxStatus::Retracted(_) => "retracted",
            TxStatus::FinalityTimeout(_) => "finality_timeout",
            TxStatus::Finalized(_) => "finalized",
            TxStatus::Usurped(_) => "usurped",
            TxStatus::Dropped => "dropped",
            TxStatus::Invalid => "invalid",
        }
    }
}

// ============================================================================
// Submission options and results
// ============================================================================

/// Retry configuration; the delay before attempt `n + 1` is `base * n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay_base: Duration) -> Self {
        Self {
            max_retries,
            retry_delay_base,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay_base.saturating_mul(attempt.max(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_base: Duration::from_millis(default_retry_delay_ms()),
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOptions {
    /// Wait for finalization instead of block inclusion
    #[serde(default)]
    pub wait_for_finalization: bool,
    /// Deadline for each submission attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub tip: Option<u128>,
    #[serde(default)]
    pub include_fee_estimate: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            wait_for_finalization: false,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            nonce: None,
            tip: None,
            include_fee_estimate: false,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl TxOptions {
    /// Options seeded from a client-wide retry policy
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            retry_delay_ms: policy.retry_delay_base.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn wait_for_finalization(mut self, wait: bool) -> Self {
        self.wait_for_finalization = wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn tip(mut self, tip: u128) -> Self {
        self.tip = Some(tip);
        self
    }

    pub fn with_fee_estimate(mut self) -> Self {
        self.include_fee_estimate = true;
        self
    }

    /// Reject options the executor cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(SdkError::invalid_parameter("timeout_ms must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(SdkError::invalid_parameter("max_retries must be at least 1"));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn submit_params(&self) -> SubmitParams {
        SubmitParams {
            nonce: self.nonce,
            tip: self.tip,
        }
    }
}

/// What the transport needs to sign and submit a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitParams {
    pub nonce: Option<u64>,
    pub tip: Option<u128>,
}

/// Execution weight of a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weight {
    pub ref_time: u64,
    pub proof_size: u64,
}

/// Estimated cost of a call before submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub partial_fee: u128,
    pub weight: Weight,
}

impl FeeEstimate {
    /// Parse a `payment_queryInfo` response
    ///
    /// Older runtimes report weight as a bare number and fees as hex or
    /// decimal strings; both shapes are accepted.
    pub fn from_query_info(value: &Value) -> Result<Self> {
        let partial_fee = match value.get("partialFee") {
            Some(Value::String(s)) => parse_numeric_string(s)?,
            Some(Value::Number(n)) => n
                .as_u64()
                .map(u128::from)
                .ok_or_else(|| SdkError::protocol(format!("invalid partialFee: {}", n)))?,
            _ => return Err(SdkError::protocol("payment_queryInfo response has no partialFee")),
        };

        let weight = match value.get("weight") {
            Some(Value::Number(n)) => Weight {
                ref_time: n.as_u64().unwrap_or_default(),
                proof_size: 0,
            },
            Some(Value::Object(map)) => {
                let field = |a: &str, b: &str| {
                    map.get(a)
                        .or_else(|| map.get(b))
                        .and_then(Value::as_u64)
                        .unwrap_or_default()
                };
                Weight {
                    ref_time: field("refTime", "ref_time"),
                    proof_size: field("proofSize", "proof_size"),
                }
            }
            _ => Weight::default(),
        };

        Ok(Self { partial_fee, weight })
    }
}

fn parse_numeric_string(s: &str) -> Result<u128> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse::<u128>(),
    };
    parsed.map_err(|_| SdkError::protocol(format!("invalid numeric string: {}", s)))
}

/// Structured reason a call failed on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionError {
    pub code: ErrorCode,
    pub message: String,
    /// Pallet that raised a module error
    pub section: Option<String>,
    /// Error variant within the pallet
    pub method: Option<String>,
    #[serde(default)]
    pub docs: Vec<String>,
}

impl TransactionError {
    pub fn module(section: impl Into<String>, method: impl Into<String>, docs: Vec<String>) -> Self {
        let section = section.into();
        let method = method.into();
        let message = if docs.is_empty() {
            format!("{}.{}", section, method)
        } else {
            format!("{}.{}: {}", section, method, docs.join(" "))
        };
        Self {
            code: ErrorCode::ModuleError,
            message,
            section: Some(section),
            method: Some(method),
            docs,
        }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DispatchError,
            message: message.into(),
            section: None,
            method: None,
            docs: Vec::new(),
        }
    }

    pub fn execution_failed() -> Self {
        Self {
            code: ErrorCode::ExecutionFailed,
            message: "no ExtrinsicSuccess event was emitted for the call".to_string(),
            section: None,
            method: None,
            docs: Vec::new(),
        }
    }
}

/// Terminal record of one logical submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    pub tx_hash: String,
    pub block_hash: Option<String>,
    pub block_number: Option<u64>,
    /// Whether the result was taken from a finalized block
    pub finalized: bool,
    pub events: Vec<ChainEvent>,
    pub fee_estimate: Option<FeeEstimate>,
    pub error: Option<TransactionError>,
    /// Submission attempts it took to reach this result
    pub attempts: u32,
}

impl TransactionResult {
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the connection for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Endpoint of the live session
    pub endpoint: Option<String>,
    /// Failed endpoint attempts since the last successful connect
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
