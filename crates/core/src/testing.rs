//! In-memory chain and repositories for service tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::models::{BlockHash, BlockRecord, EventRef, ExtrinsicHash, Page, PageRequest, TransactionRecord};
use crate::ports::{
    BlockRepository, ChainClient, DigestKind, DigestLog, EventPhase, NewHead, NewHeadStream, RawArg,
    RawBlock, RawCall, RawEvent, RawExtrinsic, RawHeader, Repositories, TokenInfo,
    TransactionRepository, WipeStats,
};

// =============================================================================
// Fixtures
// =============================================================================

pub fn babe_digest(authority_index: u32) -> DigestLog {
    let mut payload = vec![1u8];
    payload.extend_from_slice(&authority_index.to_le_bytes());
    payload.extend_from_slice(&7u64.to_le_bytes());
    DigestLog {
        kind: DigestKind::PreRuntime,
        engine: Some(*b"BABE"),
        payload,
    }
}

pub fn remark_call(remark: &[u8]) -> RawCall {
    RawCall {
        pallet: "System".into(),
        name: "remark".into(),
        call_index: [0x00, 0x01],
        args: vec![("remark".into(), RawArg::Bytes(remark.to_vec()))],
    }
}

pub fn batch_call(calls: Vec<RawCall>) -> RawCall {
    RawCall {
        pallet: "Utility".into(),
        name: "batch".into(),
        call_index: [0x1a, 0x00],
        args: vec![(
            "calls".into(),
            RawArg::Array(calls.into_iter().map(RawArg::Call).collect()),
        )],
    }
}

pub fn block_record(network: &str, number: u64) -> BlockRecord {
    BlockRecord {
        block_number: number,
        network_type: network.to_string(),
        author_public_key: Some("5Val0".into()),
        state_root: BlockHash([1; 32]),
        parent_hash: MockChain::hash_of(number.saturating_sub(1)),
        block_hash: MockChain::hash_of(number),
        extrinsic_root: BlockHash([2; 32]),
        timestamp: millis(MockChain::timestamp_of(number)),
    }
}

pub fn transaction_record(network: &str, height: u64, sender: &str) -> TransactionRecord {
    TransactionRecord {
        transaction_hash: ExtrinsicHash::of(format!("{network}:{height}:{sender}").as_bytes()),
        events: vec![EventRef {
            id: format!("{height}-1"),
            module: "system".into(),
            method: "ExtrinsicSuccess".into(),
        }],
        nonce: Some(0),
        transaction_index: 1,
        success: true,
        pays_fee: Some(true),
        signature: None,
        sender_id: Some(sender.to_string()),
        args: "5Grw..., 1".into(),
        method: "balances.transfer".into(),
        timestamp: millis(MockChain::timestamp_of(height)),
        network_type: network.to_string(),
        block: block_record(network, height).id(),
    }
}

fn millis(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap()
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// MockChain
// =============================================================================

struct Transfer {
    dest: String,
    value: String,
}

struct ChainState {
    head: u64,
    grow_remaining: u64,
    stored_timestamps: bool,
    failing: bool,
    panicking: bool,
    delay: Duration,
    calls: HashMap<Vec<u8>, RawCall>,
    transfers: HashMap<u64, Vec<Transfer>>,
    undecodable_events: HashSet<u64>,
}

/// A deterministic chain whose block `n` has hash [`MockChain::hash_of`]`(n)`.
///
/// Every block carries a `timestamp.set` inherent; transfers can be added per
/// height. Heads are announced by [`MockChain::produce_block`].
pub struct MockChain {
    state: Mutex<ChainState>,
    heads: broadcast::Sender<NewHead>,
}

impl MockChain {
    pub const SENDER: &'static str = "5Sender";
    pub const FREE_BALANCE: u128 = 12_345_000_000_000;

    pub fn new(head: u64) -> Self {
        let (heads, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(ChainState {
                head,
                grow_remaining: 0,
                stored_timestamps: true,
                failing: false,
                panicking: false,
                delay: Duration::ZERO,
                calls: HashMap::new(),
                transfers: HashMap::new(),
                undecodable_events: HashSet::new(),
            }),
            heads,
        }
    }

    pub fn hash_of(number: u64) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&number.to_le_bytes());
        bytes[31] = 0x42;
        BlockHash(bytes)
    }

    pub fn timestamp_of(number: u64) -> u64 {
        1_700_000_000_000 + number * 6_000
    }

    fn number_of(&self, hash: &BlockHash) -> Option<u64> {
        let bytes = hash.as_bytes();
        if bytes[31] != 0x42 || bytes[8..31].iter().any(|b| *b != 0) {
            return None;
        }
        let number = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        (number <= self.state.lock().unwrap().head).then_some(number)
    }

    /// Register a call so that `decode_call` recognizes the returned bytes.
    pub fn register_call(&self, call: RawCall) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let bytes = format!("call:{}", state.calls.len()).into_bytes();
        state.calls.insert(bytes.clone(), call);
        bytes
    }

    /// Add a signed `balances.transfer` from [`MockChain::SENDER`] at `height`.
    pub fn push_transfer(&self, height: u64, dest: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .transfers
            .entry(height)
            .or_default()
            .push(Transfer {
                dest: dest.to_string(),
                value: value.to_string(),
            });
    }

    /// Advance the head by one and announce it.
    pub fn produce_block(&self) {
        let head = {
            let mut state = self.state.lock().unwrap();
            state.head += 1;
            state.head
        };
        let _ = self.heads.send(NewHead {
            number: head,
            hash: Self::hash_of(head),
        });
    }

    pub fn advance_head_silently(&self, blocks: u64) {
        self.state.lock().unwrap().head += blocks;
    }

    /// Grow the head by one on each of the next `blocks` block fetches.
    pub fn grow_on_fetch(&self, blocks: u64) {
        self.state.lock().unwrap().grow_remaining = blocks;
    }

    pub fn drop_stored_timestamps(&self) {
        self.state.lock().unwrap().stored_timestamps = false;
    }

    /// Make the events of `height` fail to decode, or decode again.
    pub fn set_undecodable_events(&self, height: u64, undecodable: bool) {
        let mut state = self.state.lock().unwrap();
        if undecodable {
            state.undecodable_events.insert(height);
        } else {
            state.undecodable_events.remove(&height);
        }
    }

    /// Make block fetches panic instead of returning an error.
    pub fn set_panicking(&self, panicking: bool) {
        self.state.lock().unwrap().panicking = panicking;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        wait_until(|| self.heads.receiver_count() >= count).await;
    }

    async fn rpc(&self) -> ChainResult<()> {
        let (failing, delay) = {
            let state = self.state.lock().unwrap();
            (state.failing, state.delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(ChainError::RpcError("mock failure".into()));
        }
        Ok(())
    }

    fn known(&self, hash: BlockHash) -> ChainResult<u64> {
        self.number_of(&hash).ok_or_else(|| ChainError::BlockFetchError {
            hash: hash.to_hex(),
            message: "unknown block".into(),
        })
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        self.rpc().await?;
        let head = self.state.lock().unwrap().head;
        Ok((height <= head).then(|| Self::hash_of(height)))
    }

    async fn best_head(&self) -> ChainResult<u64> {
        self.rpc().await?;
        Ok(self.state.lock().unwrap().head)
    }

    async fn block(&self, hash: BlockHash) -> ChainResult<RawBlock> {
        self.rpc().await?;
        let panicking = self.state.lock().unwrap().panicking;
        if panicking {
            panic!("mock block fetch panicked");
        }
        let number = self.known(hash)?;

        let mut state = self.state.lock().unwrap();
        if state.grow_remaining > 0 {
            state.grow_remaining -= 1;
            state.head += 1;
        }

        let mut extrinsics = vec![RawExtrinsic {
            index: 0,
            bytes: format!("timestamp:{number}").into_bytes(),
            call: RawCall {
                pallet: "Timestamp".into(),
                name: "set".into(),
                call_index: [0x03, 0x00],
                args: vec![(
                    "now".into(),
                    RawArg::Value(json!(Self::timestamp_of(number).to_string())),
                )],
            },
            signer: None,
            signature: None,
            nonce: None,
            tip: None,
        }];

        for (i, transfer) in state.transfers.get(&number).into_iter().flatten().enumerate() {
            extrinsics.push(RawExtrinsic {
                index: i as u32 + 1,
                bytes: format!("transfer:{number}:{}:{}", transfer.dest, transfer.value).into_bytes(),
                call: RawCall {
                    pallet: "Balances".into(),
                    name: "transfer".into(),
                    call_index: [0x06, 0x00],
                    args: vec![
                        ("dest".into(), RawArg::Value(json!(transfer.dest))),
                        ("value".into(), RawArg::Value(json!(transfer.value))),
                    ],
                },
                signer: Some(Self::SENDER.into()),
                signature: Some("0x01".into()),
                nonce: Some(i as u64),
                tip: None,
            });
        }

        Ok(RawBlock {
            header: RawHeader {
                number,
                parent_hash: Self::hash_of(number.saturating_sub(1)),
                state_root: BlockHash([1; 32]),
                extrinsics_root: BlockHash([2; 32]),
                digest: vec![babe_digest((number % 3) as u32)],
            },
            extrinsics,
        })
    }

    async fn events_at(&self, hash: BlockHash) -> ChainResult<Vec<RawEvent>> {
        self.rpc().await?;
        let number = self.known(hash)?;

        if self.state.lock().unwrap().undecodable_events.contains(&number) {
            return Err(ChainError::BlockFetchError {
                hash: hash.to_hex(),
                message: "event 1 could not be decoded".into(),
            });
        }

        let mut events = vec![RawEvent {
            index: 0,
            phase: EventPhase::ApplyExtrinsic(0),
            pallet: "System".into(),
            name: "ExtrinsicSuccess".into(),
            data: json!({ "dispatch_info": { "class": { "Mandatory": [] }, "pays_fee": { "Yes": [] } } }),
        }];

        let state = self.state.lock().unwrap();
        for (i, transfer) in state.transfers.get(&number).into_iter().flatten().enumerate() {
            let extrinsic = i as u32 + 1;
            let base = events.len() as u32;
            events.push(RawEvent {
                index: base,
                phase: EventPhase::ApplyExtrinsic(extrinsic),
                pallet: "Balances".into(),
                name: "Transfer".into(),
                data: json!({ "from": Self::SENDER, "to": transfer.dest, "amount": transfer.value }),
            });
            events.push(RawEvent {
                index: base + 1,
                phase: EventPhase::ApplyExtrinsic(extrinsic),
                pallet: "System".into(),
                name: "ExtrinsicSuccess".into(),
                data: json!({ "dispatch_info": { "class": { "Normal": [] }, "pays_fee": { "Yes": [] } } }),
            });
        }
        Ok(events)
    }

    async fn timestamp_at(&self, hash: BlockHash) -> ChainResult<Option<u64>> {
        self.rpc().await?;
        let number = self.known(hash)?;
        let stored = self.state.lock().unwrap().stored_timestamps;
        Ok(stored.then(|| Self::timestamp_of(number)))
    }

    async fn session_validators_at(&self, _hash: BlockHash) -> ChainResult<Vec<String>> {
        self.rpc().await?;
        Ok(vec!["5Val0".into(), "5Val1".into(), "5Val2".into()])
    }

    async fn free_balance(&self, _address: &str) -> ChainResult<u128> {
        self.rpc().await?;
        Ok(Self::FREE_BALANCE)
    }

    async fn subscribe_new_heads(&self) -> ChainResult<NewHeadStream> {
        self.rpc().await?;
        let rx = self.heads.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(head) => return Some((Ok(head), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn decode_call(&self, bytes: &[u8]) -> ChainResult<RawCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(bytes)
            .cloned()
            .ok_or_else(|| ChainError::CallDecodeError("unknown call bytes".into()))
    }

    fn to_address(&self, public: &[u8; 32]) -> String {
        format!("5{}", hex::encode(&public[..4]))
    }

    fn token(&self) -> TokenInfo {
        TokenInfo::default()
    }
}

// =============================================================================
// MemoryRepositories
// =============================================================================

/// Repositories that enforce the same uniqueness rules as the SQL schema.
#[derive(Default)]
pub struct MemoryRepositories {
    blocks: MemoryBlocks,
    transactions: MemoryTransactions,
}

#[derive(Default)]
pub struct MemoryBlocks {
    rows: Mutex<Vec<BlockRecord>>,
}

#[derive(Default)]
pub struct MemoryTransactions {
    rows: Mutex<Vec<TransactionRecord>>,
    failing: Mutex<bool>,
}

impl MemoryRepositories {
    pub fn block_numbers(&self, network: &str) -> Vec<u64> {
        let mut numbers: Vec<u64> = self
            .blocks
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.network_type == network)
            .map(|b| b.block_number)
            .collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn transaction_count(&self, network: &str) -> usize {
        self.transactions
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| tx.network_type == network)
            .count()
    }

    /// Make every following `insert_transaction` fail.
    pub fn fail_transaction_inserts(&self, failing: bool) {
        *self.transactions.failing.lock().unwrap() = failing;
    }

    /// Insert bypassing the uniqueness rule, as rows written before it existed.
    pub fn force_insert_transaction(&self, tx: TransactionRecord) {
        self.transactions.rows.lock().unwrap().push(tx);
    }
}

fn paginate<T: Clone>(rows: Vec<T>, page: PageRequest) -> Page<T> {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect();
    Page { items, total }
}

#[async_trait]
impl BlockRepository for MemoryBlocks {
    async fn insert_block(&self, block: &BlockRecord) -> StorageResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|b| b.network_type == block.network_type && b.block_number == block.block_number)
        {
            return Ok(false);
        }
        rows.push(block.clone());
        Ok(true)
    }

    async fn latest_block_number(&self, network: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.network_type == network)
            .map(|b| b.block_number)
            .max())
    }

    async fn list_blocks_by_author(
        &self,
        author: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<BlockRecord>> {
        let mut rows: Vec<BlockRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.network_type == network && b.author_public_key.as_deref() == Some(author))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactions {
    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<bool> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError::QueryError("insert rejected".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|t| t.network_type == tx.network_type && t.transaction_hash == tx.transaction_hash)
        {
            return Ok(false);
        }
        rows.push(tx.clone());
        Ok(true)
    }

    async fn list_transactions_by_sender(
        &self,
        sender: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<TransactionRecord>> {
        let mut rows: Vec<TransactionRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.network_type == network && t.sender_id.as_deref() == Some(sender))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(rows, page))
    }

    async fn duplicate_hashes(
        &self,
        network: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ExtrinsicHash>> {
        let mut counts: HashMap<ExtrinsicHash, usize> = HashMap::new();
        for tx in self.rows.lock().unwrap().iter() {
            if tx.network_type == network && since.is_none_or(|s| tx.timestamp >= s) {
                *counts.entry(tx.transaction_hash).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(hash, _)| hash)
            .collect())
    }
}

#[async_trait]
impl Repositories for MemoryRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        &self.transactions
    }

    async fn wipe_network(&self, network: &str) -> StorageResult<WipeStats> {
        let mut blocks = self.blocks.rows.lock().unwrap();
        let mut transactions = self.transactions.rows.lock().unwrap();
        let (before_blocks, before_txs) = (blocks.len(), transactions.len());
        blocks.retain(|b| b.network_type != network);
        transactions.retain(|t| t.network_type != network);
        Ok(WipeStats {
            blocks: (before_blocks - blocks.len()) as u64,
            transactions: (before_txs - transactions.len()) as u64,
        })
    }
}
