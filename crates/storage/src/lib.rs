//! Storage layer for the Tessera indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `tessera-core`: connection pooling, migrations, inserts that
//! are idempotent per network, account queries and the per-network wipe
//! used by restarts.
//!
//! # Usage
//!
//! ```ignore
//! use tessera_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! let config = DatabaseConfig::for_indexer(&database_url, networks.len());
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories, PurgeStats};
