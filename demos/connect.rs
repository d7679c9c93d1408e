//! Connection Example
//!
//! Connects to the first reachable node, prints the chain it found and
//! follows connection events until Ctrl-C.
//!
//! # Running this example
//!
//! ```bash
//! CHAIN_RPC_ENDPOINTS=wss://rpc-a.example.org,wss://rpc-b.example.org \
//!     RUST_LOG=chain_session_sdk=debug cargo run --example connect
//! ```

use chain_session_sdk::{
    ChainClient, ChainEvent, ChainSchema, Config, ConnectionEvent, Result, RuntimeMetadata,
};
use std::sync::Arc;

/// Placeholder schema; a real application plugs in its SCALE codec here
struct OpaqueSchema;

impl ChainSchema for OpaqueSchema {
    fn decode_metadata(&self, _raw: &[u8]) -> Result<RuntimeMetadata> {
        Ok(RuntimeMetadata::default())
    }

    fn decode_events(
        &self,
        _raw: &[u8],
        _metadata: &RuntimeMetadata,
        _extrinsic_index: u32,
    ) -> Result<Vec<ChainEvent>> {
        Ok(Vec::new())
    }

    fn extrinsic_hash(&self, _extrinsic: &[u8]) -> [u8; 32] {
        [0u8; 32]
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(_) => Config::builder()
            .endpoint("wss://rpc.polkadot.io")
            .endpoint("https://rpc.polkadot.io")
            .build()?,
    };

    println!("Endpoints:");
    for endpoint in &config.endpoints {
        println!("   {}", endpoint);
    }

    let client = match ChainClient::connect_default(config, Arc::new(OpaqueSchema)).await {
        Ok(client) => client,
        Err(e) => {
            println!("Connection failed ({}): {}", e.code(), e);
            return Ok(());
        }
    };

    let session = client.session()?;
    let chain = session.chain();
    println!("Connected to {} via {}", chain.chain, session.endpoint());
    println!("   Genesis: {}", chain.genesis_hash);
    println!(
        "   Runtime: {} v{}",
        chain.runtime.spec_name, chain.runtime.spec_version
    );
    println!(
        "   Token: {} ({} decimals)",
        chain.token_symbol().unwrap_or("?"),
        chain.token_decimals().unwrap_or(0)
    );

    let mut events = client.subscribe_events();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected { endpoint, chain }) => {
                    println!("Reconnected to {} at {}", chain, endpoint);
                }
                Ok(ConnectionEvent::Disconnected { endpoint }) => {
                    println!("Lost {}", endpoint);
                }
                Ok(ConnectionEvent::ReconnectFailed { error }) => {
                    println!("Recovery failed: {}", error);
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Status: {:?}", client.status());
    client.close().await?;
    Ok(())
}
