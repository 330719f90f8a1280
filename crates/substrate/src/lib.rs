//! Substrate RPC adapter for the Tessera indexer.
//!
//! This crate implements the [`ChainClient`] port from `tessera-core`,
//! providing connectivity to Substrate-based blockchains via WebSocket RPC.
//!
//! # Features
//!
//! - Reconnecting WebSocket client with exponential backoff
//! - Dynamic metadata decoding using subxt, following runtime upgrades
//! - Type-aware SCALE to JSON conversion (SS58 account ids, hex bytes)
//! - Nested calls surfaced as calls, opaque byte payloads kept as bytes
//! - Token decimals, symbol and SS58 prefix from `system_properties`
//!
//! # Usage
//!
//! ```ignore
//! use tessera_substrate::{SubstrateClient, SubstrateClientConfig};
//!
//! let client = SubstrateClient::connect(SubstrateClientConfig {
//!     network: "TESTNET".to_string(),
//!     ws_url: "wss://rpc.testnet.example:443".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let head = client.best_head().await?;
//! ```
//!
//! [`ChainClient`]: tessera_core::ports::ChainClient

mod client;

pub use client::{SubstrateClient, SubstrateClientConfig};
