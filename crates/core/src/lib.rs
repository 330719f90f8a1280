//! Core domain layer for the Tessera indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! scanning services for a multi-network Substrate block and transaction
//! indexer. It follows hexagonal architecture principles - this is the
//! innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     tessera (binary)                        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │      tessera-substrate       │       tessera-storage        │
//! │           (RPC)              │        (PostgreSQL)          │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                     tessera-core  ← YOU ARE HERE            │
//! │            (models, ports, registry, services)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (BlockRecord, TransactionRecord, NormalizedCall)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`registry`] - Per-network scan state and stop protocol
//! - [`services`] - Fetching, decoding, correlation, scanning and queries
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Ports
//!
//! - [`ports::ChainClient`] - One connection to a Substrate network
//! - [`ports::Repositories`] - Persist and query indexed data
//!
//! # Indexer Lifecycle
//!
//! 1. Register every configured network, resuming from its highest stored block
//! 2. Catch up block by block to the chain head
//! 3. Follow new heads, falling back to catch-up when behind
//! 4. On restart: drain, wipe the network's rows, scan again from height 1

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod registry;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
