//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Business logic errors (unknown networks, bad input)
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Blockchain RPC errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The requested network is not configured.
    ///
    /// Lifecycle and query operations reject unknown names directly,
    /// they are never retried.
    #[error("Invalid network type: {0}")]
    UnknownNetwork(String),

    /// A network with this name was already registered.
    #[error("Network already registered: {0}")]
    DuplicateNetwork(String),

    /// Account ID failed validation.
    #[error("Invalid account ID: {0}")]
    InvalidAccountId(String),

    /// Data decoding/deserialization failed.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Blockchain RPC and connectivity errors.
///
/// These errors occur when communicating with a Substrate node
/// via WebSocket RPC. They are fatal to the current scan attempt of one
/// network only; the supervisor retries with backoff.
#[derive(Debug, Error)]
pub enum ChainError {
    /// WebSocket connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Block subscription failed or disconnected.
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Runtime metadata could not be fetched or parsed.
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// The node has no block at this height.
    #[error("No block hash for height {0}")]
    UnknownHeight(u64),

    /// Block could not be fetched or decoded.
    #[error("Block fetch error at hash {hash}: {message}")]
    BlockFetchError {
        /// Block hash that failed to fetch.
        hash: String,
        /// Error details.
        message: String,
    },

    /// The address is not valid SS58 for this network.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Bytes could not be decoded as a runtime call.
    #[error("Call decode error: {0}")]
    CallDecodeError(String),

    /// An RPC call exceeded its time bound.
    #[error("Timeout after {after:?} waiting for {operation}")]
    Timeout {
        /// Operation that stalled.
        operation: &'static str,
        /// Configured bound.
        after: Duration,
    },
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::IndexerService`].
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blockchain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The scan task of this network is already running.
    #[error("Network {0} is already running")]
    AlreadyRunning(String),

    /// The scan task went away without acknowledging a stop request.
    #[error("Stop of network {0} was not acknowledged")]
    StopAborted(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    /// Whether this error is a caller mistake rather than an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IndexerError::Domain(DomainError::UnknownNetwork(_))
                | IndexerError::Domain(DomainError::InvalidAccountId(_))
                | IndexerError::Domain(DomainError::ValidationError(_))
                | IndexerError::Chain(ChainError::InvalidAddress(_))
        )
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
