//! Port trait for a Substrate chain connection.
//!
//! This trait defines the interface for fetching blocks, events and state
//! from one network, and for following new heads. Implementations live in
//! the infrastructure layer (e.g., `tessera-substrate`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::BlockHash;

// =============================================================================
// Blocks
// =============================================================================

/// Raw block data from the chain before domain transformation.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub header: RawHeader,
    /// Extrinsics in block order.
    pub extrinsics: Vec<RawExtrinsic>,
}

/// Decoded block header fields.
#[derive(Debug, Clone)]
pub struct RawHeader {
    pub number: u64,
    pub parent_hash: BlockHash,
    pub state_root: BlockHash,
    pub extrinsics_root: BlockHash,
    pub digest: Vec<DigestLog>,
}

/// Kind of a header digest item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    PreRuntime,
    Consensus,
    Seal,
    RuntimeEnvironmentUpdated,
    Other,
}

/// One digest log of a block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestLog {
    pub kind: DigestKind,
    /// Consensus engine id, e.g. `*b"BABE"`.
    pub engine: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

/// Raw extrinsic data.
#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    /// Index in block.
    pub index: u32,
    /// Full SCALE-encoded extrinsic, including signature.
    pub bytes: Vec<u8>,
    pub call: RawCall,
    /// SS58 address of the signer (if signed).
    pub signer: Option<String>,
    /// Hex-encoded signature (if signed).
    pub signature: Option<String>,
    pub nonce: Option<u64>,
    pub tip: Option<u128>,
}

// =============================================================================
// Calls
// =============================================================================

/// A call as decoded against the runtime metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCall {
    /// Pallet name as declared in metadata, e.g. `Balances`.
    pub pallet: String,
    /// Call name as declared in metadata, e.g. `transfer_keep_alive`.
    pub name: String,
    pub call_index: [u8; 2],
    pub args: Vec<(String, RawArg)>,
}

/// A call argument as produced by the chain adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArg {
    /// Any value that is neither a call nor an opaque byte payload.
    Value(serde_json::Value),
    /// A value typed as the runtime call enum.
    Call(RawCall),
    /// An opaque byte payload that may itself be an encoded call.
    Bytes(Vec<u8>),
    Array(Vec<RawArg>),
}

// =============================================================================
// Events
// =============================================================================

/// Execution phase an event was emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// Emitted while applying the extrinsic at this index.
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

/// Raw event data.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Index in block.
    pub index: u32,
    pub phase: EventPhase,
    /// Pallet name as declared in metadata.
    pub pallet: String,
    /// Event variant name.
    pub name: String,
    /// Event fields as JSON.
    pub data: serde_json::Value,
}

// =============================================================================
// Heads & token
// =============================================================================

/// Notification of a new best block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHead {
    pub number: u64,
    pub hash: BlockHash,
}

/// Stream of new heads.
pub type NewHeadStream = Pin<Box<dyn Stream<Item = ChainResult<NewHead>> + Send>>;

/// Native token properties from the chain registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub decimals: u8,
    pub symbol: String,
    pub ss58_prefix: u16,
}

impl Default for TokenInfo {
    fn default() -> Self {
        Self {
            decimals: 12,
            symbol: "UNIT".to_string(),
            ss58_prefix: 42,
        }
    }
}

// =============================================================================
// Port
// =============================================================================

/// Port trait for a single network connection.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Hash of the block at `height`, `None` if the node does not know it yet.
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>>;

    /// Height of the current best block.
    async fn best_head(&self) -> ChainResult<u64>;

    /// Header and extrinsics of a block.
    async fn block(&self, hash: BlockHash) -> ChainResult<RawBlock>;

    /// System events recorded at a block.
    async fn events_at(&self, hash: BlockHash) -> ChainResult<Vec<RawEvent>>;

    /// `Timestamp.Now` in milliseconds at a block.
    async fn timestamp_at(&self, hash: BlockHash) -> ChainResult<Option<u64>>;

    /// Session validator set at a block, as SS58 addresses.
    async fn session_validators_at(&self, hash: BlockHash) -> ChainResult<Vec<String>>;

    /// Free balance of an account at the best block.
    async fn free_balance(&self, address: &str) -> ChainResult<u128>;

    /// Subscribe to new best heads.
    async fn subscribe_new_heads(&self) -> ChainResult<NewHeadStream>;

    /// Decode bytes as a call of the current runtime.
    fn decode_call(&self, bytes: &[u8]) -> ChainResult<RawCall>;

    /// SS58 address of a public key, using the network's prefix.
    fn to_address(&self, public: &[u8; 32]) -> String;

    /// Token properties, resolved once at connect time.
    fn token(&self) -> TokenInfo;
}
