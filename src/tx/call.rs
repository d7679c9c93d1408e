//! Collaborator seams for call encoding, signing and chain schema
//!
//! The engine never looks inside a call. Encoding, key handling and event
//! decoding live behind these traits so that any codec can plug in.

use crate::error::Result;
use crate::types::{ChainEvent, RuntimeMetadata};

/// Everything a call needs to produce a signed extrinsic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub nonce: u64,
    pub tip: u128,
    pub genesis_hash: String,
    pub spec_version: u32,
    pub transaction_version: u32,
}

/// Holds an already-loaded key
pub trait Signer: Send + Sync {
    /// Address the signature is attributed to (used for nonce and fee lookups)
    fn address(&self) -> &str;

    /// Whether the key can currently sign (unlocked, correct scheme, ...)
    fn is_usable(&self) -> bool {
        true
    }

    /// Sign the canonical payload bytes
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// An opaque, pre-encoded state-changing call
pub trait SignedCall: Send + Sync {
    /// Pallet the call belongs to
    fn pallet(&self) -> &str;

    /// Call name within the pallet
    fn call_name(&self) -> &str;

    /// Produce the signed extrinsic bytes
    fn encode_signed(&self, signer: &dyn Signer, context: &SigningContext) -> Result<Vec<u8>>;

    /// Produce bytes suitable for `payment_queryInfo`, signed with a dummy signature
    fn encode_for_fee(&self, address: &str) -> Result<Vec<u8>>;

    fn label(&self) -> String {
        format!("{}.{}", self.pallet(), self.call_name())
    }
}

/// Chain-specific decoding used by the node transport
pub trait ChainSchema: Send + Sync {
    /// Decode the raw `state_getMetadata` blob
    fn decode_metadata(&self, raw: &[u8]) -> Result<RuntimeMetadata>;

    /// Decode `System.Events` storage, keeping only the events of one extrinsic
    fn decode_events(
        &self,
        raw: &[u8],
        metadata: &RuntimeMetadata,
        extrinsic_index: u32,
    ) -> Result<Vec<ChainEvent>>;

    /// Hash of an encoded extrinsic as the pool reports it
    fn extrinsic_hash(&self, extrinsic: &[u8]) -> [u8; 32];
}
