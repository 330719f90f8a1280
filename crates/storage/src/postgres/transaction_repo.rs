//! Transaction repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tessera_core::error::{StorageError, StorageResult};
use tessera_core::models::{
    BlockHash, BlockId, EventRef, ExtrinsicHash, Page, PageRequest, TransactionRecord,
};
use tessera_core::ports::TransactionRepository;

use super::helpers::{bytes_to_hash32, bytes_to_hash32_strict, i64_to_u64, limit_offset};

// =============================================================================
// Repository Implementation
// =============================================================================

/// PostgreSQL implementation of TransactionRepository.
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<bool> {
        let events = serde_json::to_value(&tx.events)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                network_type, transaction_hash, block_number, block_hash, transaction_index,
                method, args, events, nonce, success, pays_fee, signature, sender_id, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (network_type, transaction_hash) DO NOTHING
            "#,
        )
        .bind(&tx.network_type)
        .bind(&tx.transaction_hash.0[..])
        .bind(tx.block.number as i64)
        .bind(&tx.block.hash.0[..])
        .bind(tx.transaction_index as i32)
        .bind(&tx.method)
        .bind(&tx.args)
        .bind(events)
        .bind(tx.nonce.map(|n| n as i64))
        .bind(tx.success)
        .bind(tx.pays_fee)
        .bind(&tx.signature)
        .bind(&tx.sender_id)
        .bind(tx.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_transactions_by_sender(
        &self,
        sender: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<TransactionRecord>> {
        let (limit, offset) = limit_offset(page);

        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT network_type, transaction_hash, block_number, block_hash, transaction_index,
                   method, args, events, nonce, success, pays_fee, signature, sender_id, timestamp
            FROM transactions
            WHERE network_type = $1 AND sender_id = $2
            ORDER BY timestamp DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(network)
        .bind(sender)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions WHERE network_type = $1 AND sender_id = $2",
        )
        .bind(network)
        .bind(sender)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(TransactionRow::into_record)
                .collect::<StorageResult<Vec<_>>>()?,
            total: i64_to_u64(total.0, "transactions.count")?,
        })
    }

    async fn duplicate_hashes(
        &self,
        network: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ExtrinsicHash>> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT transaction_hash
            FROM transactions
            WHERE network_type = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
            GROUP BY transaction_hash
            HAVING COUNT(*) > 1
            "#,
        )
        .bind(network)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter()
            .map(|(hash,)| {
                bytes_to_hash32(hash, "transactions.transaction_hash").map(ExtrinsicHash)
            })
            .collect()
    }
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Database row representation for TransactionRecord.
#[derive(sqlx::FromRow)]
struct TransactionRow {
    network_type: String,
    transaction_hash: Vec<u8>,
    block_number: i64,
    block_hash: Vec<u8>,
    transaction_index: i32,
    method: String,
    args: String,
    events: serde_json::Value,
    nonce: Option<i64>,
    success: bool,
    pays_fee: Option<bool>,
    signature: Option<String>,
    sender_id: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TransactionRow {
    fn into_record(self) -> StorageResult<TransactionRecord> {
        let events: Vec<EventRef> = serde_json::from_value(self.events)
            .map_err(|e| StorageError::SerializationError(format!("transactions.events: {e}")))?;

        Ok(TransactionRecord {
            transaction_hash: ExtrinsicHash(bytes_to_hash32_strict(
                self.transaction_hash,
                "transactions.transaction_hash",
            )?),
            events,
            nonce: self
                .nonce
                .map(|n| i64_to_u64(n, "transactions.nonce"))
                .transpose()?,
            transaction_index: u32::try_from(self.transaction_index).map_err(|_| {
                StorageError::SerializationError(format!(
                    "transactions.transaction_index is negative: {}",
                    self.transaction_index
                ))
            })?,
            success: self.success,
            pays_fee: self.pays_fee,
            signature: self.signature,
            sender_id: self.sender_id,
            args: self.args,
            method: self.method,
            timestamp: self.timestamp,
            network_type: self.network_type,
            block: BlockId {
                number: i64_to_u64(self.block_number, "transactions.block_number")?,
                hash: BlockHash(bytes_to_hash32_strict(
                    self.block_hash,
                    "transactions.block_hash",
                )?),
            },
        })
    }
}
