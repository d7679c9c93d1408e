//! chain-session-sdk - connection resilience and transaction lifecycle for chain clients
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chain_session_sdk::{ChainClient, Config, TxOptions};
//!
//! let config = Config::builder().endpoint("wss://rpc.example.org").build()?;
//! let client = ChainClient::connect_default(config, schema).await?;
//! let result = client.execute(&call, &signer, TxOptions::default()).await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod session;
pub mod tx;
pub mod types;

pub use client::ChainClient;
pub use config::{Config, ConfigBuilder};
pub use connection::{Connector, Transport, TransportEvent, TxWatch};
pub use error::{ErrorCode, Result, SdkError, TxStateFailure};
pub use events::ConnectionEvent;
pub use session::Session;
pub use tx::{ChainSchema, SignedCall, Signer, SigningContext};
pub use types::*;
