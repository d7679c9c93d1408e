//! Transaction lifecycle: submission, status tracking, retries and classification

pub mod call;
pub mod classifier;
pub mod executor;
pub mod fee;
pub mod tracker;

pub use call::{ChainSchema, SignedCall, Signer, SigningContext};
pub use classifier::{classify_dispatch, classify_outcome, classify_rpc_error};
pub use executor::{TransactionAttempt, TransactionExecutor};
pub use fee::FeeEstimator;
pub use tracker::{Phase, StatusTracker, Step};
