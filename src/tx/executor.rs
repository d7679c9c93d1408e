//! Transaction executor: submission attempts, deadlines and retries

use crate::connection::ConnectionManager;
use crate::error::{Result, SdkError};
use crate::session::Session;
use crate::tx::fee::FeeEstimator;
use crate::tx::tracker::{build_result, StatusTracker, Step};
use crate::tx::{SignedCall, Signer};
use crate::types::{SubmitParams, TransactionResult, TxOptions};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One submission cycle with its own deadline and abort signal
///
/// Dropping the attempt cancels its token, which releases any subscription
/// opened for it.
#[derive(Debug)]
pub struct TransactionAttempt {
    number: u32,
    deadline: Instant,
    cancel: CancellationToken,
}

impl TransactionAttempt {
    pub fn new(number: u32, timeout: std::time::Duration) -> Self {
        Self {
            number,
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Token for work scoped to this attempt
    pub fn token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TransactionAttempt {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives signed calls to a terminal [`TransactionResult`]
#[derive(Clone)]
pub struct TransactionExecutor {
    manager: ConnectionManager,
    fees: FeeEstimator,
}

impl TransactionExecutor {
    pub fn new(manager: ConnectionManager, fees: FeeEstimator) -> Self {
        Self { manager, fees }
    }

    /// Submit `call` and wait for its terminal outcome
    ///
    /// On-chain rejections come back as an unsuccessful result. Transport
    /// failures are retried with a linearly growing delay; once attempts run
    /// out they are returned as [`SdkError::SubmissionFailed`].
    pub async fn execute(
        &self,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        options: &TxOptions,
    ) -> Result<TransactionResult> {
        options.validate()?;

        if !signer.is_usable() {
            return Err(SdkError::signing(format!(
                "signer {} cannot sign",
                signer.address()
            )));
        }

        let session = self.acquire_session().await?;
        let metadata = session.metadata();
        if !metadata.is_empty() && !metadata.has_call(call.pallet(), call.call_name()) {
            return Err(SdkError::MethodUnavailable {
                pallet: call.pallet().to_string(),
                call: call.call_name().to_string(),
            });
        }

        let fee_estimate = if options.include_fee_estimate {
            self.fees
                .estimate(session.transport().as_ref(), call, signer.address())
                .await
        } else {
            None
        };
        drop(session);

        let policy = options.retry_policy();
        // Every attempt resubmits the same extrinsic, so the nonce is fixed once
        let mut nonce = options.nonce;
        let mut number = 1;

        loop {
            let attempt = TransactionAttempt::new(number, options.attempt_timeout());

            match self.run_attempt(&attempt, call, signer, options, &mut nonce).await {
                Ok(mut result) => {
                    result.fee_estimate = fee_estimate;
                    result.attempts = number;
                    info!(
                        tx_hash = %result.tx_hash,
                        success = result.success,
                        finalized = result.finalized,
                        attempts = number,
                        "transaction complete"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && number < policy.max_retries => {
                    let delay = policy.delay_for(number);
                    warn!(
                        call = %call.label(),
                        attempt = number,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    drop(attempt);
                    tokio::time::sleep(delay).await;
                    number += 1;
                }
                Err(e) if e.is_retryable() => {
                    error!(call = %call.label(), attempts = number, error = %e, "giving up");
                    return Err(SdkError::SubmissionFailed {
                        attempts: number,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    debug!(call = %call.label(), attempt = number, error = %e, "fatal submission error");
                    return Err(e);
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        attempt: &TransactionAttempt,
        call: &dyn SignedCall,
        signer: &dyn Signer,
        options: &TxOptions,
        nonce: &mut Option<u64>,
    ) -> Result<TransactionResult> {
        let limit = options.attempt_timeout();
        let deadline = attempt.deadline();

        let session = tokio::time::timeout_at(deadline, self.acquire_session())
            .await
            .map_err(|_| SdkError::Timeout(limit))??;

        let pinned = match *nonce {
            Some(pinned) => pinned,
            None => {
                let fetched = tokio::time::timeout_at(
                    deadline,
                    session.transport().account_nonce(signer.address()),
                )
                .await
                .map_err(|_| SdkError::Timeout(limit))??;
                debug!(address = %signer.address(), nonce = fetched, "nonce resolved");
                *nonce = Some(fetched);
                fetched
            }
        };
        let params = SubmitParams {
            nonce: Some(pinned),
            ..options.submit_params()
        };

        debug!(
            attempt = attempt.number(),
            endpoint = %session.endpoint(),
            call = %call.label(),
            "submitting"
        );

        let mut watch = tokio::time::timeout_at(
            deadline,
            session
                .transport()
                .submit_and_watch(call, signer, params, attempt.token()),
        )
        .await
        .map_err(|_| SdkError::Timeout(limit))??;

        let mut tracker = StatusTracker::new(watch.tx_hash(), options.wait_for_finalization);
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                _ = &mut expiry => {
                    warn!(tx_hash = %watch.tx_hash(), phase = ?tracker.phase(), "attempt timed out");
                    watch.unsubscribe();
                    return Err(SdkError::Timeout(limit));
                }
                status = watch.next() => {
                    let Some(status) = status else {
                        return Err(SdkError::network(format!(
                            "status stream for {} ended before a terminal status",
                            watch.tx_hash()
                        )));
                    };
                    debug!(tx_hash = %watch.tx_hash(), status = status.name(), "status update");

                    match tracker.advance(status) {
                        Step::Pending => {}
                        Step::Included { inclusion, finalized } => {
                            return Ok(build_result(
                                watch.tx_hash(),
                                inclusion,
                                finalized,
                                session.metadata(),
                                None,
                                attempt.number(),
                            ));
                        }
                        Step::Rejected(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Current session, or join a connect if the last one was lost
    async fn acquire_session(&self) -> Result<Arc<Session>> {
        match self.manager.current_session() {
            Ok(session) => Ok(session),
            Err(e) if self.manager.is_closed() => Err(e),
            Err(_) => self.manager.join_or_start().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_and_cancellation() {
        let attempt = TransactionAttempt::new(2, Duration::from_secs(30));
        assert_eq!(attempt.number(), 2);
        assert_eq!(attempt.deadline(), Instant::now() + Duration::from_secs(30));

        let token = attempt.token();
        assert!(!token.is_cancelled());
        drop(attempt);
        assert!(token.is_cancelled());
    }
}
