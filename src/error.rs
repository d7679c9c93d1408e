//! Error types for the chain session SDK
//!
//! Connectivity and submission failures are returned as [`SdkError`]. Calls
//! that were included on chain but rejected by the runtime are not errors at
//! this level: they come back as a failed [`TransactionResult`] carrying a
//! [`TransactionError`].
//!
//! [`TransactionResult`]: crate::types::TransactionResult
//! [`TransactionError`]: crate::types::TransactionError

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable, machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigError,
    NoEndpointReachable,
    ConnectionTimeout,
    AlreadyConnecting,
    NotConnected,
    ConnectionError,
    SigningFailed,
    MethodUnavailable,
    InvalidParameter,
    NetworkError,
    Timeout,
    TransactionDropped,
    TransactionInvalid,
    TransactionUsurped,
    FinalityTimeout,
    SubmissionFailed,
    RpcError,
    ProtocolError,
    InternalError,
    ModuleError,
    DispatchError,
    ExecutionFailed,
}

impl ErrorCode {
    /// The code as it appears on the wire and in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::NoEndpointReachable => "NO_ENDPOINT_REACHABLE",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::AlreadyConnecting => "ALREADY_CONNECTING",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::SigningFailed => "SIGNING_FAILED",
            ErrorCode::MethodUnavailable => "METHOD_UNAVAILABLE",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::TransactionDropped => "TRANSACTION_DROPPED",
            ErrorCode::TransactionInvalid => "TRANSACTION_INVALID",
            ErrorCode::TransactionUsurped => "TRANSACTION_USURPED",
            ErrorCode::FinalityTimeout => "FINALITY_TIMEOUT",
            ErrorCode::SubmissionFailed => "SUBMISSION_FAILED",
            ErrorCode::RpcError => "RPC_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ModuleError => "MODULE_ERROR",
            ErrorCode::DispatchError => "DISPATCH_ERROR",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle outcomes that end a submission without a usable inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStateFailure {
    Dropped,
    Invalid,
    Usurped,
    FinalityTimeout,
}

impl fmt::Display for TxStateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStateFailure::Dropped => "dropped",
            TxStateFailure::Invalid => "invalid",
            TxStateFailure::Usurped => "usurped",
            TxStateFailure::FinalityTimeout => "finality timeout",
        };
        f.write_str(name)
    }
}

/// SDK error types
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every endpoint failed in every round
    #[error("No endpoint reachable after {attempts} attempts: {last}")]
    NoEndpointReachable { attempts: u32, last: Box<SdkError> },

    /// Opening a transport or waiting for it to become ready took too long
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// A connection attempt is already running
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    /// No live session
    #[error("Not connected to a node")]
    NotConnected,

    /// Transport could not be opened or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// The signer is unusable or refused to sign
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// The call does not exist on the connected runtime
    #[error("Call {pallet}.{call} is not available on the connected runtime")]
    MethodUnavailable { pallet: String, call: String },

    /// Caller supplied an unusable option
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Request or subscription failed in transit
    #[error("Network error: {0}")]
    Network(String),

    /// Operation timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The transaction pool gave up on the transaction
    #[error("Transaction {state}: {detail}")]
    TransactionState { state: TxStateFailure, detail: String },

    /// Retryable failures persisted through every attempt
    #[error("Submission failed after {attempts} attempts: {last}")]
    SubmissionFailed { attempts: u32, last: Box<SdkError> },

    /// JSON-RPC error response the node returned
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SdkError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        SdkError::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        SdkError::Connection(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        SdkError::Network(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        SdkError::Protocol(msg.into())
    }

    /// Create a signing error
    pub fn signing(msg: impl Into<String>) -> Self {
        SdkError::SigningFailed(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        SdkError::InvalidParameter(msg.into())
    }

    /// Create a transaction state error
    pub fn tx_state(state: TxStateFailure, detail: impl Into<String>) -> Self {
        SdkError::TransactionState {
            state,
            detail: detail.into(),
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SdkError::Config(_) => ErrorCode::ConfigError,
            SdkError::NoEndpointReachable { .. } => ErrorCode::NoEndpointReachable,
            SdkError::ConnectionTimeout(_) => ErrorCode::ConnectionTimeout,
            SdkError::AlreadyConnecting => ErrorCode::AlreadyConnecting,
            SdkError::NotConnected => ErrorCode::NotConnected,
            SdkError::Connection(_) => ErrorCode::ConnectionError,
            SdkError::SigningFailed(_) => ErrorCode::SigningFailed,
            SdkError::MethodUnavailable { .. } => ErrorCode::MethodUnavailable,
            SdkError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            SdkError::Network(_) => ErrorCode::NetworkError,
            SdkError::Timeout(_) => ErrorCode::Timeout,
            SdkError::TransactionState { state, .. } => match state {
                TxStateFailure::Dropped => ErrorCode::TransactionDropped,
                TxStateFailure::Invalid => ErrorCode::TransactionInvalid,
                TxStateFailure::Usurped => ErrorCode::TransactionUsurped,
                TxStateFailure::FinalityTimeout => ErrorCode::FinalityTimeout,
            },
            SdkError::SubmissionFailed { .. } => ErrorCode::SubmissionFailed,
            SdkError::Rpc { .. } => ErrorCode::RpcError,
            SdkError::Protocol(_) => ErrorCode::ProtocolError,
            SdkError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a fresh submission attempt may succeed where this one failed
    ///
    /// Only in-flight transport failures qualify. Signing, parameter and
    /// availability errors are fatal, and a finality timeout means the call
    /// was already included once.
    pub fn is_retryable(&self) -> bool {
        match self {
            SdkError::Network(_)
            | SdkError::Timeout(_)
            | SdkError::Connection(_)
            | SdkError::ConnectionTimeout(_)
            | SdkError::NotConnected => true,
            SdkError::TransactionState { state, .. } => !matches!(state, TxStateFailure::FinalityTimeout),
            _ => false,
        }
    }

    /// The innermost cause of an aggregate error
    pub fn root_cause(&self) -> &SdkError {
        match self {
            SdkError::NoEndpointReachable { last, .. } | SdkError::SubmissionFailed { last, .. } => {
                last.root_cause()
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SdkError::Network(format!("request timed out: {}", e))
        } else if e.is_connect() {
            SdkError::Connection(e.to_string())
        } else if e.is_decode() {
            SdkError::Protocol(e.to_string())
        } else {
            SdkError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        SdkError::Protocol(format!("JSON error: {}", e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SdkError::Connection(format!("WebSocket error: {}", e))
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        SdkError::Connection(format!("IO error: {}", e))
    }
}

impl From<hex::FromHexError> for SdkError {
    fn from(e: hex::FromHexError) -> Self {
        SdkError::Protocol(format!("invalid hex: {}", e))
    }
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;
