//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `tessera-core`
//! using PostgreSQL as the backing store. Every table carries a
//! `network_type` column and every query filters on it.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool, migrations and purge
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgBlockRepository`, `PgTransactionRepository`
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url, networks.len());
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod block_repo;
mod database;
mod helpers;
mod transaction_repo;

pub use block_repo::PgBlockRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use transaction_repo::PgTransactionRepository;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tessera_core::error::{StorageError, StorageResult};
use tessera_core::ports::{BlockRepository, Repositories, TransactionRepository, WipeStats};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
pub struct PgRepositories {
    db: Arc<Database>,
    blocks: PgBlockRepository,
    transactions: PgTransactionRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            blocks: PgBlockRepository::new(&db),
            transactions: PgTransactionRepository::new(db.pool().clone()),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn transactions(&self) -> &dyn TransactionRepository {
        &self.transactions
    }

    async fn wipe_network(&self, network: &str) -> StorageResult<WipeStats> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let transactions = sqlx::query("DELETE FROM transactions WHERE network_type = $1")
            .bind(network)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?
            .rows_affected();

        let blocks = sqlx::query("DELETE FROM blocks WHERE network_type = $1")
            .bind(network)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        debug!(network, blocks, transactions, "Network rows deleted");

        Ok(WipeStats {
            blocks,
            transactions,
        })
    }
}
