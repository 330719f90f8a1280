//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tessera_core::error::{StorageError, StorageResult};
use tessera_core::models::{BlockHash, BlockRecord, Page, PageRequest};
use tessera_core::ports::BlockRepository;

use super::database::Database;
use super::helpers::{bytes_to_hash32, bytes_to_hash32_strict, i64_to_u64, limit_offset};

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn insert_block(&self, block: &BlockRecord) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO blocks (
                network_type, block_number, block_hash, parent_hash, state_root,
                extrinsic_root, author_public_key, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (network_type, block_number) DO NOTHING
            "#,
        )
        .bind(&block.network_type)
        .bind(block.block_number as i64)
        .bind(&block.block_hash.0[..])
        .bind(&block.parent_hash.0[..])
        .bind(&block.state_root.0[..])
        .bind(&block.extrinsic_root.0[..])
        .bind(&block.author_public_key)
        .bind(block.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_block_number(&self, network: &str) -> StorageResult<Option<u64>> {
        // MAX returns NULL when no rows match, so we need Option<i64> in the tuple
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(block_number) FROM blocks WHERE network_type = $1")
                .bind(network)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.0
            .map(|n| i64_to_u64(n, "blocks.block_number"))
            .transpose()
    }

    async fn list_blocks_by_author(
        &self,
        author: &str,
        network: &str,
        page: PageRequest,
    ) -> StorageResult<Page<BlockRecord>> {
        let (limit, offset) = limit_offset(page);

        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT network_type, block_number, block_hash, parent_hash, state_root,
                   extrinsic_root, author_public_key, timestamp
            FROM blocks
            WHERE network_type = $1 AND author_public_key = $2
            ORDER BY block_number DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(network)
        .bind(author)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM blocks WHERE network_type = $1 AND author_public_key = $2",
        )
        .bind(network)
        .bind(author)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(BlockRow::into_record)
                .collect::<StorageResult<Vec<_>>>()?,
            total: i64_to_u64(total.0, "blocks.count")?,
        })
    }
}

/// Database row representation for BlockRecord.
#[derive(sqlx::FromRow)]
struct BlockRow {
    network_type: String,
    block_number: i64,
    block_hash: Vec<u8>,
    parent_hash: Vec<u8>,
    state_root: Vec<u8>,
    extrinsic_root: Vec<u8>,
    author_public_key: Option<String>,
    timestamp: DateTime<Utc>,
}

impl BlockRow {
    fn into_record(self) -> StorageResult<BlockRecord> {
        Ok(BlockRecord {
            block_number: i64_to_u64(self.block_number, "blocks.block_number")?,
            network_type: self.network_type,
            author_public_key: self.author_public_key,
            state_root: BlockHash(bytes_to_hash32(self.state_root, "blocks.state_root")?),
            parent_hash: BlockHash(bytes_to_hash32(self.parent_hash, "blocks.parent_hash")?),
            block_hash: BlockHash(bytes_to_hash32_strict(self.block_hash, "blocks.block_hash")?),
            extrinsic_root: BlockHash(bytes_to_hash32(
                self.extrinsic_root,
                "blocks.extrinsic_root",
            )?),
            timestamp: self.timestamp,
        })
    }
}
