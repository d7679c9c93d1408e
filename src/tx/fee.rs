//! Best-effort fee estimation

use crate::connection::Transport;
use crate::tx::SignedCall;
use crate::types::FeeEstimate;
use std::time::Duration;
use tracing::{debug, warn};

/// Queries fees without ever failing the caller
#[derive(Debug, Clone, Copy)]
pub struct FeeEstimator {
    timeout: Duration,
}

impl FeeEstimator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `None` when the node cannot or will not answer in time
    pub async fn estimate(
        &self,
        transport: &dyn Transport,
        call: &dyn SignedCall,
        address: &str,
    ) -> Option<FeeEstimate> {
        match tokio::time::timeout(self.timeout, transport.estimate_fee(call, address)).await {
            Ok(Ok(fee)) => {
                debug!(
                    call = %call.label(),
                    partial_fee = %fee.partial_fee,
                    ref_time = fee.weight.ref_time,
                    "fee estimated"
                );
                Some(fee)
            }
            Ok(Err(e)) => {
                warn!(call = %call.label(), error = %e, "fee estimation failed");
                None
            }
            Err(_) => {
                warn!(
                    call = %call.label(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "fee estimation timed out"
                );
                None
            }
        }
    }
}
