//! Block fetching and extrinsic decoding.
//!
//! [`BlockFetcher::fetch`] retrieves the body and the system events of a
//! block in one concurrent round trip, resolves the author from the header
//! digest, and decodes every extrinsic. Any RPC failure aborts the fetch and
//! is returned to the scan loop.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::error::{ChainError, ChainResult};
use crate::models::{ArgValue, BlockHash, BlockRecord, ExtrinsicHash, NormalizedCall};
use crate::ports::{ChainClient, DigestKind, DigestLog, RawEvent};

use super::decoder::CallDecoder;

const BABE_ENGINE: [u8; 4] = *b"BABE";
const AURA_ENGINE: [u8; 4] = *b"aura";
const POW_ENGINE: [u8; 4] = *b"pow_";

// =============================================================================
// Output types
// =============================================================================

/// An event attached to its extrinsic.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedEvent {
    /// Index of the event in the block.
    pub index: u32,
    /// Pallet section in lowerCamelCase.
    pub module: String,
    /// Event variant name.
    pub method: String,
    pub data: serde_json::Value,
}

/// An extrinsic decoded from a block, before correlation.
#[derive(Debug, Clone)]
pub struct DecodedExtrinsic {
    pub index: u32,
    pub hash: ExtrinsicHash,
    /// `section.method`.
    pub method: String,
    pub call: NormalizedCall,
    pub signer: Option<String>,
    pub signature: Option<String>,
    pub nonce: Option<u64>,
    /// Filled by the correlator.
    pub events: Vec<CorrelatedEvent>,
    pub success: bool,
    pub pays_fee: Option<bool>,
}

/// A fully fetched block, ready for correlation.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub record: BlockRecord,
    pub digest: Vec<DigestLog>,
    pub extrinsics: Vec<DecodedExtrinsic>,
    pub events: Vec<RawEvent>,
}

// =============================================================================
// Timeouts
// =============================================================================

/// Bound an RPC future by `after`.
pub async fn with_timeout<T, F>(after: Duration, operation: &'static str, fut: F) -> ChainResult<T>
where
    F: Future<Output = ChainResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChainError::Timeout { operation, after }),
    }
}

// =============================================================================
// Author resolution
// =============================================================================

/// What the header digest says about the block author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorHint {
    /// BABE authority index into the session validators.
    Authority(u32),
    /// Aura slot; the author is `validators[slot % len]`.
    Slot(u64),
    /// PoW author public key.
    Account([u8; 32]),
}

impl AuthorHint {
    /// Resolve an index or slot hint against a validator set.
    pub fn pick(&self, validators: &[String]) -> Option<String> {
        match *self {
            AuthorHint::Authority(index) => validators.get(index as usize).cloned(),
            AuthorHint::Slot(slot) if !validators.is_empty() => {
                validators.get((slot % validators.len() as u64) as usize).cloned()
            }
            AuthorHint::Slot(_) | AuthorHint::Account(_) => None,
        }
    }
}

/// Read the author hint from a header digest.
///
/// BABE and Aura pre-runtime digests take precedence over a PoW consensus
/// digest.
pub fn author_hint(logs: &[DigestLog]) -> Option<AuthorHint> {
    let pre_runtime = logs
        .iter()
        .filter(|log| log.kind == DigestKind::PreRuntime)
        .find_map(|log| match log.engine? {
            // PreDigest variant byte, then the authority index
            BABE_ENGINE if log.payload.len() >= 5 => {
                let index = u32::from_le_bytes(log.payload[1..5].try_into().ok()?);
                Some(AuthorHint::Authority(index))
            }
            AURA_ENGINE if log.payload.len() >= 8 => {
                let slot = u64::from_le_bytes(log.payload[0..8].try_into().ok()?);
                Some(AuthorHint::Slot(slot))
            }
            _ => None,
        });
    if pre_runtime.is_some() {
        return pre_runtime;
    }

    logs.iter()
        .filter(|log| log.kind == DigestKind::Consensus && log.engine == Some(POW_ENGINE))
        .find_map(|log| {
            let account: [u8; 32] = log.payload.as_slice().try_into().ok()?;
            Some(AuthorHint::Account(account))
        })
}

/// Resolve the author of a block from its digest and validator set.
pub fn resolve_author(
    logs: &[DigestLog],
    validators: &[String],
    to_address: impl Fn(&[u8; 32]) -> String,
) -> Option<String> {
    match author_hint(logs)? {
        AuthorHint::Account(public) => Some(to_address(&public)),
        hint => hint.pick(validators),
    }
}

// =============================================================================
// BlockFetcher
// =============================================================================

/// Fetches and decodes blocks of one network.
pub struct BlockFetcher<'a> {
    chain: &'a dyn ChainClient,
    network: &'a str,
    timeout: Duration,
}

impl<'a> BlockFetcher<'a> {
    pub fn new(chain: &'a dyn ChainClient, network: &'a str, timeout: Duration) -> Self {
        Self {
            chain,
            network,
            timeout,
        }
    }

    /// Fetch a block by hash.
    pub async fn fetch(&self, hash: BlockHash) -> ChainResult<FetchedBlock> {
        let (raw, events, stored_timestamp) = tokio::try_join!(
            with_timeout(self.timeout, "chain_getBlock", self.chain.block(hash)),
            with_timeout(self.timeout, "system_events", self.chain.events_at(hash)),
            with_timeout(self.timeout, "timestamp_now", self.chain.timestamp_at(hash)),
        )?;
        let header = raw.header;
        trace!(
            network = %self.network,
            block = header.number,
            extrinsics = raw.extrinsics.len(),
            events = events.len(),
            "Block fetched"
        );

        let author = match author_hint(&header.digest) {
            Some(AuthorHint::Account(public)) => Some(self.chain.to_address(&public)),
            Some(hint) => {
                let validators = with_timeout(
                    self.timeout,
                    "session_validators",
                    self.chain.session_validators_at(hash),
                )
                .await?;
                hint.pick(&validators)
            }
            None => None,
        };

        let decoder = CallDecoder::new(self.chain, self.network);
        let extrinsics: Vec<DecodedExtrinsic> = raw
            .extrinsics
            .into_iter()
            .map(|ext| {
                let call = decoder.decode(&ext.call);
                DecodedExtrinsic {
                    index: ext.index,
                    hash: ExtrinsicHash::of(&ext.bytes),
                    method: call.method.clone(),
                    call,
                    signer: ext.signer,
                    signature: ext.signature,
                    nonce: ext.nonce,
                    events: Vec::new(),
                    success: false,
                    pays_fee: None,
                }
            })
            .collect();

        let timestamp = stored_timestamp
            .or_else(|| inherent_timestamp(&extrinsics))
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
            .unwrap_or_else(|| {
                warn!(network = %self.network, block = header.number, "⚠️  Block has no timestamp");
                DateTime::<Utc>::UNIX_EPOCH
            });

        let record = BlockRecord {
            block_number: header.number,
            network_type: self.network.to_string(),
            author_public_key: author,
            state_root: header.state_root,
            parent_hash: header.parent_hash,
            block_hash: hash,
            extrinsic_root: header.extrinsics_root,
            timestamp,
        };

        Ok(FetchedBlock {
            record,
            digest: header.digest,
            extrinsics,
            events,
        })
    }
}

/// `now` argument of the `timestamp.set` inherent.
fn inherent_timestamp(extrinsics: &[DecodedExtrinsic]) -> Option<u64> {
    let set = extrinsics.iter().find(|ext| ext.method == "timestamp.set")?;
    match set.call.arg("now")? {
        ArgValue::Scalar(serde_json::Value::String(s)) => s.parse().ok(),
        ArgValue::Scalar(serde_json::Value::Number(n)) => n.as_u64(),
        _ => None,
    }
}
