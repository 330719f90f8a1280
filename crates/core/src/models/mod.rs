//! Domain models representing indexed blockchain data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod call;

pub use call::{ArgValue, NormalizedCall};

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte block hash (Blake2-256).
    BlockHash
);

hash32_newtype!(
    /// 32-byte Blake2-256 digest of the full encoded extrinsic.
    ///
    /// Identical signed payloads submitted twice hash the same, which is what
    /// makes transaction inserts idempotent per network.
    ExtrinsicHash
);

impl ExtrinsicHash {
    /// Hash raw extrinsic bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(sp_crypto_hashing::blake2_256(bytes))
    }
}

// =============================================================================
// Block Identification
// =============================================================================

/// Unique identifier for a block, combining number and hash for fork safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub number: u64,
    pub hash: BlockHash,
}

// =============================================================================
// Blocks
// =============================================================================

/// Indexed block header of one network.
///
/// Unique per `(network_type, block_number)`. Written once by the scan loop and
/// removed only by a network wipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub block_number: u64,
    pub network_type: String,
    /// SS58 address of the author, when the consensus digest allows it.
    pub author_public_key: Option<String>,
    pub state_root: BlockHash,
    pub parent_hash: BlockHash,
    pub block_hash: BlockHash,
    pub extrinsic_root: BlockHash,
    pub timestamp: DateTime<Utc>,
}

impl BlockRecord {
    pub fn id(&self) -> BlockId {
        BlockId {
            number: self.block_number,
            hash: self.block_hash,
        }
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Reference to an event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// `{block_number}-{event_index}`.
    pub id: String,
    /// Pallet section, e.g. `balances`.
    pub module: String,
    /// Event variant, e.g. `Transfer`.
    pub method: String,
}

/// Indexed transaction of one network.
///
/// `transaction_hash` is unique within a network. Conflicting inserts are
/// no-ops rather than errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction_hash: ExtrinsicHash,
    /// Events in emission order.
    pub events: Vec<EventRef>,
    pub nonce: Option<u64>,
    pub transaction_index: u32,
    pub success: bool,
    /// `None` when the dispatch-info event did not carry a fee flag.
    pub pays_fee: Option<bool>,
    pub signature: Option<String>,
    pub sender_id: Option<String>,
    /// Flattened arguments, either `"dest, value"` or a JSON tree.
    pub args: String,
    /// `section.method`, e.g. `balances.transferKeepAlive`.
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub network_type: String,
    pub block: BlockId,
}

/// A transaction returned by an account query, with the account's balance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransactions {
    pub transactions: Page<TransactionRecord>,
    /// Free balance formatted with the network's decimals and symbol.
    pub balance: String,
}

// =============================================================================
// Pagination
// =============================================================================

/// Offset/limit window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Upper bound applied to every listing.
    pub const MAX_LIMIT: u64 = 100;

    /// Build a request, clamping the limit into `1..=MAX_LIMIT`.
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// One page of results with the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}
