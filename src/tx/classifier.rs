//! Error classification for on-chain outcomes and node RPC errors

use crate::error::{SdkError, TxStateFailure};
use crate::types::{ChainEvent, DispatchFailure, RuntimeMetadata, TransactionError};
use serde_json::Value;

// Transaction pool error codes of the author RPC
const POOL_INVALID_TX: i64 = 1010;
const POOL_UNKNOWN_VALIDITY: i64 = 1011;
const POOL_TEMPORARILY_BANNED: i64 = 1012;
const POOL_ALREADY_IMPORTED: i64 = 1013;
const POOL_TOO_LOW_PRIORITY: i64 = 1014;
const POOL_CYCLE_DETECTED: i64 = 1015;
const POOL_IMMEDIATELY_DROPPED: i64 = 1016;

/// Decide the outcome of an included call from its events
///
/// Returns `None` only when success is affirmatively evidenced. A dispatch
/// error wins over any `ExtrinsicSuccess` marker, and a call that emitted
/// neither marker is reported as `ExecutionFailed`.
pub fn classify_outcome(events: &[ChainEvent], metadata: &RuntimeMetadata) -> Option<TransactionError> {
    if let Some(failure) = events.iter().find_map(|e| e.dispatch_error.as_ref()) {
        return Some(classify_dispatch(failure, metadata));
    }

    if events.iter().any(ChainEvent::is_extrinsic_failed) {
        return Some(TransactionError::dispatch("extrinsic failed without a decodable dispatch error"));
    }

    if events.iter().any(ChainEvent::is_extrinsic_success) {
        return None;
    }

    Some(TransactionError::execution_failed())
}

/// Turn a raw dispatch failure into a structured error, decoding module errors via metadata
pub fn classify_dispatch(failure: &DispatchFailure, metadata: &RuntimeMetadata) -> TransactionError {
    match failure {
        DispatchFailure::Module {
            pallet_index,
            error_index,
        } => match metadata.module_error(*pallet_index, *error_index) {
            Some((pallet, error)) => {
                TransactionError::module(pallet.name.clone(), error.name.clone(), error.docs.clone())
            }
            None => TransactionError::dispatch(format!(
                "module error {} of pallet {}",
                error_index, pallet_index
            )),
        },
        DispatchFailure::Other { message } => TransactionError::dispatch(message.clone()),
    }
}

/// Map a JSON-RPC error object to an SDK error
///
/// Pool rejections become retryable transaction-state errors; everything else
/// is a plain RPC error.
pub fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> SdkError {
    let detail = match data {
        Some(Value::String(s)) => format!("{}: {}", message, s),
        Some(Value::Null) | None => message.to_string(),
        Some(other) => format!("{}: {}", message, other),
    };

    let state = match code {
        POOL_INVALID_TX | POOL_UNKNOWN_VALIDITY | POOL_CYCLE_DETECTED => TxStateFailure::Invalid,
        POOL_TEMPORARILY_BANNED | POOL_ALREADY_IMPORTED | POOL_IMMEDIATELY_DROPPED => {
            TxStateFailure::Dropped
        }
        POOL_TOO_LOW_PRIORITY => TxStateFailure::Usurped,
        _ => {
            return SdkError::Rpc {
                code,
                message: detail,
            }
        }
    };

    SdkError::tx_state(state, detail)
}
