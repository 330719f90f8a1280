//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `tessera-storage`).
//! Every query takes the network as a parameter; rows of different networks
//! never mix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::models::{BlockRecord, ExtrinsicHash, Page, PageRequest, TransactionRecord};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Insert a block. Returns `false` if the height was already stored.
    async fn insert_block(&self, block: &BlockRecord) -> StorageResult<bool>;

    /// Highest stored block number of a network.
    async fn latest_block_number(&self, network: &str) -> StorageResult<Option<u64>>;

    /// Blocks authored by an account, highest first.
    async fn list_blocks_by_author(
        &self,
        author: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<BlockRecord>>;
}

/// Repository for transaction data.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a transaction. Returns `false` if the hash was already stored
    /// for this network.
    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<bool>;

    /// Transactions sent by an account, newest first.
    async fn list_transactions_by_sender(
        &self,
        sender: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<TransactionRecord>>;

    /// Hashes stored more than once for a network, optionally only among rows
    /// with a timestamp at or after `since`.
    async fn duplicate_hashes(
        &self,
        network: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ExtrinsicHash>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Row counts removed by a network wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeStats {
    pub blocks: u64,
    pub transactions: u64,
}

/// Combined repository access for the indexer.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the block repository.
    fn blocks(&self) -> &dyn BlockRepository;

    /// Access the transaction repository.
    fn transactions(&self) -> &dyn TransactionRepository;

    /// Delete every block and transaction of a network atomically.
    async fn wipe_network(&self, network: &str) -> StorageResult<WipeStats>;
}
