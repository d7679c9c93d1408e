//! A live, connected session with cached chain information

use crate::connection::Transport;
use crate::error::Result;
use crate::types::{ChainInfo, Endpoint, RuntimeMetadata, RuntimeVersion};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Transport handle plus the chain information fetched when it was opened
///
/// A session is never mutated; reconnecting builds a new one. Holders of an
/// old session must not submit through it once [`Session::is_live`] is false.
pub struct Session {
    id: Uuid,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    chain: ChainInfo,
    metadata: Arc<RuntimeMetadata>,
    established_at: Instant,
}

impl Session {
    /// Fetch chain information over a ready transport
    pub async fn establish(endpoint: Endpoint, transport: Arc<dyn Transport>) -> Result<Self> {
        let (chain, genesis_hash, runtime, properties, metadata) = tokio::try_join!(
            transport.fetch_chain_name(),
            transport.fetch_genesis_hash(),
            transport.fetch_runtime_version(),
            transport.fetch_properties(),
            transport.fetch_metadata(),
        )?;

        debug!(
            endpoint = %endpoint,
            chain = %chain,
            spec_version = runtime.spec_version,
            pallets = metadata.pallets.len(),
            "session established"
        );

        Ok(Self {
            id: Uuid::new_v4(),
            endpoint,
            transport,
            chain: ChainInfo {
                chain,
                genesis_hash,
                runtime,
                properties,
            },
            metadata: Arc::new(metadata),
            established_at: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    pub fn runtime(&self) -> &RuntimeVersion {
        &self.chain.runtime
    }

    pub fn metadata(&self) -> &Arc<RuntimeMetadata> {
        &self.metadata
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// True while the underlying transport reports connected
    pub fn is_live(&self) -> bool {
        self.transport.is_connected()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.url())
            .field("chain", &self.chain.chain)
            .field("spec_version", &self.chain.runtime.spec_version)
            .field("live", &self.is_live())
            .finish()
    }
}
