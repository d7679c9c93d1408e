//! Lifecycle state machine for one submission attempt

use crate::error::{SdkError, TxStateFailure};
use crate::tx::classifier::classify_outcome;
use crate::types::{FeeEstimate, Inclusion, RuntimeMetadata, TransactionResult, TxStatus};
use tracing::{debug, trace, warn};

/// Progress of a call; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Submitted,
    Pooled,
    InBlock,
    Finalized,
}

/// What the executor should do after a notification
#[derive(Debug)]
pub enum Step {
    /// Keep waiting
    Pending,
    /// Terminal: build the result from this inclusion
    Included { inclusion: Inclusion, finalized: bool },
    /// Terminal: the attempt failed
    Rejected(SdkError),
}

/// Folds lifecycle notifications into a single terminal disposition
#[derive(Debug)]
pub struct StatusTracker {
    tx_hash: String,
    wait_for_finalization: bool,
    phase: Phase,
    terminal: bool,
}

impl StatusTracker {
    pub fn new(tx_hash: impl Into<String>, wait_for_finalization: bool) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            wait_for_finalization,
            phase: Phase::Submitted,
            terminal: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Apply one notification
    ///
    /// Once a terminal step has been returned every later notification is
    /// ignored, so a stream yields at most one result.
    pub fn advance(&mut self, status: TxStatus) -> Step {
        if self.terminal {
            trace!(tx_hash = %self.tx_hash, status = status.name(), "ignoring status after terminal");
            return Step::Pending;
        }

        match status {
            TxStatus::Future | TxStatus::Ready | TxStatus::Broadcast(_) => {
                self.enter(Phase::Pooled);
                Step::Pending
            }
            TxStatus::InBlock(inclusion) => {
                self.enter(Phase::InBlock);
                if self.wait_for_finalization {
                    debug!(
                        tx_hash = %self.tx_hash,
                        block = %inclusion.block_hash,
                        "in block, waiting for finalization"
                    );
                    Step::Pending
                } else {
                    self.terminal = true;
                    Step::Included {
                        inclusion,
                        finalized: false,
                    }
                }
            }
            TxStatus::Finalized(inclusion) => {
                self.enter(Phase::Finalized);
                self.terminal = true;
                Step::Included {
                    inclusion,
                    finalized: true,
                }
            }
            TxStatus::Retracted(block) => {
                warn!(tx_hash = %self.tx_hash, block = %block, "block retracted, waiting for re-inclusion");
                Step::Pending
            }
            TxStatus::FinalityTimeout(block) => self.reject(
                TxStateFailure::FinalityTimeout,
                format!("block {} was not finalized in time", block),
            ),
            TxStatus::Usurped(by) => {
                self.reject(TxStateFailure::Usurped, format!("replaced by {}", by))
            }
            TxStatus::Dropped => self.reject(TxStateFailure::Dropped, "dropped from the transaction pool"),
            TxStatus::Invalid => self.reject(TxStateFailure::Invalid, "declared invalid by the transaction pool"),
        }
    }

    fn enter(&mut self, phase: Phase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    fn reject(&mut self, state: TxStateFailure, detail: impl Into<String>) -> Step {
        self.terminal = true;
        Step::Rejected(SdkError::tx_state(state, detail))
    }
}

/// Build the terminal result of an included call
pub fn build_result(
    tx_hash: &str,
    inclusion: Inclusion,
    finalized: bool,
    metadata: &RuntimeMetadata,
    fee_estimate: Option<FeeEstimate>,
    attempts: u32,
) -> TransactionResult {
    let error = classify_outcome(&inclusion.events, metadata);
    TransactionResult {
        success: error.is_none(),
        tx_hash: tx_hash.to_string(),
        block_hash: Some(inclusion.block_hash),
        block_number: inclusion.block_number,
        finalized,
        events: inclusion.events,
        fee_estimate,
        error,
        attempts,
    }
}
