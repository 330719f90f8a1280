//! Per-network scan state.
//!
//! Every configured network owns one [`NetworkState`]: its chain handle, the
//! last scanned height, its lifecycle phase and the stop protocol used by
//! restarts and shutdown. States are created at startup by
//! [`NetworkRegistry::register`] and never shared between network tasks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DomainError, IndexerError, IndexerResult};
use crate::ports::{BlockRepository, ChainClient, TokenInfo};

// =============================================================================
// Configuration
// =============================================================================

/// One configured network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    /// Network name, used as `network_type` on every stored row.
    #[serde(alias = "NETWORK")]
    pub name: String,
    /// WebSocket RPC endpoint.
    #[serde(alias = "URL")]
    pub url: String,
    /// Overrides the token decimals reported by the chain.
    #[serde(default)]
    pub decimals: Option<u8>,
    /// Overrides the token symbol reported by the chain.
    #[serde(default)]
    pub symbol: Option<String>,
}

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a network scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    CatchingUp,
    Live,
    Draining,
    Wiped,
    /// Waiting out a backoff delay after a failed attempt.
    Retrying,
    /// Gave up after too many consecutive failures; only a restart resumes it.
    Failed,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::CatchingUp => "catching_up",
            ScanPhase::Live => "live",
            ScanPhase::Draining => "draining",
            ScanPhase::Wiped => "wiped",
            ScanPhase::Retrying => "retrying",
            ScanPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Stop protocol
// =============================================================================

/// Completion signal returned by a stop request.
///
/// Resolves once the network task has returned; after that no further
/// writes for the network happen until it is relaunched.
#[derive(Debug)]
pub struct StopHandle {
    network: String,
    rx: oneshot::Receiver<()>,
}

impl StopHandle {
    pub async fn wait(self) -> IndexerResult<()> {
        self.rx
            .await
            .map_err(|_| IndexerError::StopAborted(self.network))
    }
}

struct Control {
    phase: ScanPhase,
    stop_requested: bool,
    token: CancellationToken,
    waiters: Vec<oneshot::Sender<()>>,
    running: bool,
}

// =============================================================================
// NetworkState
// =============================================================================

/// Mutable scan state of one network.
pub struct NetworkState {
    config: NetworkConfig,
    chain: Arc<dyn ChainClient>,
    /// Last scanned height; zero means nothing scanned yet.
    cursor: AtomicU64,
    control: Mutex<Control>,
}

impl fmt::Debug for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkState")
            .field("name", &self.config.name)
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

impl NetworkState {
    pub fn new(config: NetworkConfig, chain: Arc<dyn ChainClient>, cursor: u64) -> Self {
        Self {
            config,
            chain,
            cursor: AtomicU64::new(cursor),
            control: Mutex::new(Control {
                phase: ScanPhase::Idle,
                stop_requested: false,
                token: CancellationToken::new(),
                waiters: Vec::new(),
                running: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Token properties with the configured overrides applied.
    pub fn token(&self) -> TokenInfo {
        let mut token = self.chain.token();
        if let Some(decimals) = self.config.decimals {
            token.decimals = decimals;
        }
        if let Some(symbol) = &self.config.symbol {
            token.symbol = symbol.clone();
        }
        token
    }

    // -------------------------------------------------------------------------
    // Cursor
    // -------------------------------------------------------------------------

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn mark_scanned(&self, height: u64) {
        self.cursor.store(height, Ordering::Release);
    }

    /// Reset the cursor so that the next scan begins at height 1.
    pub fn clear_cursor(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    // -------------------------------------------------------------------------
    // Phase
    // -------------------------------------------------------------------------

    pub async fn phase(&self) -> ScanPhase {
        self.control.lock().await.phase
    }

    pub async fn set_phase(&self, phase: ScanPhase) {
        let mut control = self.control.lock().await;
        // a pending stop keeps the network draining
        if control.stop_requested && control.running {
            return;
        }
        control.phase = phase;
    }

    // -------------------------------------------------------------------------
    // Stop protocol
    // -------------------------------------------------------------------------

    pub async fn stop_requested(&self) -> bool {
        self.control.lock().await.stop_requested
    }

    /// Token cancelled by the next stop request.
    pub async fn stop_token(&self) -> CancellationToken {
        self.control.lock().await.token.clone()
    }

    /// Request a cooperative stop.
    ///
    /// The scan task polls the flag between blocks, so the returned handle
    /// may take up to one block's processing time to resolve. If no task is
    /// running it resolves immediately.
    pub async fn request_stop(&self) -> StopHandle {
        let mut control = self.control.lock().await;
        control.stop_requested = true;
        control.token.cancel();

        let (tx, rx) = oneshot::channel();
        if control.running {
            control.phase = ScanPhase::Draining;
            control.waiters.push(tx);
        } else {
            let _ = tx.send(());
        }
        debug!(network = %self.config.name, running = control.running, "Stop requested");

        StopHandle {
            network: self.config.name.clone(),
            rx,
        }
    }

    /// Clear the stop flag and arm a fresh token.
    pub async fn clear_stop(&self) {
        let mut control = self.control.lock().await;
        control.stop_requested = false;
        control.token = CancellationToken::new();
    }

    /// Mark the scan task as running and hand it the current token.
    pub async fn begin_run(&self) -> IndexerResult<CancellationToken> {
        let mut control = self.control.lock().await;
        if control.running {
            return Err(IndexerError::AlreadyRunning(self.config.name.clone()));
        }
        control.running = true;
        control.phase = ScanPhase::CatchingUp;
        Ok(control.token.clone())
    }

    /// Mark the scan task as returned and resolve every pending stop handle.
    pub async fn finish_run(&self, phase: ScanPhase) {
        let mut control = self.control.lock().await;
        control.running = false;
        control.phase = phase;
        for waiter in control.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    pub async fn is_running(&self) -> bool {
        self.control.lock().await.running
    }
}

// =============================================================================
// NetworkRegistry
// =============================================================================

/// All configured networks, keyed by name.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, Arc<NetworkState>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the state of a network, resuming from its highest stored block.
    pub async fn register(
        &mut self,
        config: NetworkConfig,
        chain: Arc<dyn ChainClient>,
        blocks: &dyn BlockRepository,
    ) -> IndexerResult<Arc<NetworkState>> {
        if self.networks.contains_key(&config.name) {
            return Err(DomainError::DuplicateNetwork(config.name).into());
        }

        let cursor = blocks.latest_block_number(&config.name).await?.unwrap_or(0);
        debug!(network = %config.name, cursor, "Network registered");

        let name = config.name.clone();
        let state = Arc::new(NetworkState::new(config, chain, cursor));
        self.networks.insert(name, state.clone());
        Ok(state)
    }

    pub fn get(&self, name: &str) -> IndexerResult<&Arc<NetworkState>> {
        self.networks
            .get(name)
            .ok_or_else(|| DomainError::UnknownNetwork(name.to_string()).into())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<NetworkState>> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn mark_scanned(&self, name: &str, height: u64) -> IndexerResult<()> {
        self.get(name)?.mark_scanned(height);
        Ok(())
    }

    pub async fn request_stop(&self, name: &str) -> IndexerResult<StopHandle> {
        Ok(self.get(name)?.request_stop().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRepositories, MockChain, block_record};
    use crate::ports::Repositories;

    fn config(name: &str) -> NetworkConfig {
        NetworkConfig {
            name: name.to_string(),
            url: "ws://127.0.0.1:9944".to_string(),
            decimals: None,
            symbol: None,
        }
    }

    #[test]
    fn test_config_accepts_legacy_keys() {
        let json = r#"[{"NETWORK": "TESTNET", "URL": "wss://rpc.testnet"},
                       {"name": "MAINNET", "url": "wss://rpc.mainnet", "decimals": 10}]"#;
        let configs: Vec<NetworkConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(configs[0].name, "TESTNET");
        assert_eq!(configs[0].url, "wss://rpc.testnet");
        assert_eq!(configs[1].decimals, Some(10));
    }

    #[tokio::test]
    async fn test_register_resumes_from_highest_block() {
        let repos = MemoryRepositories::default();
        repos.blocks().insert_block(&block_record("TESTNET", 100)).await.unwrap();
        repos.blocks().insert_block(&block_record("OTHER", 500)).await.unwrap();

        let mut registry = NetworkRegistry::new();
        let chain = Arc::new(MockChain::new(0));
        let state = registry
            .register(config("TESTNET"), chain.clone(), repos.blocks())
            .await
            .unwrap();
        assert_eq!(state.cursor(), 100);

        let fresh = registry
            .register(config("FRESH"), chain, repos.blocks())
            .await
            .unwrap();
        assert_eq!(fresh.cursor(), 0);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_get_rejects_unknown() {
        let repos = MemoryRepositories::default();
        let mut registry = NetworkRegistry::new();
        let chain = Arc::new(MockChain::new(0));
        registry
            .register(config("TESTNET"), chain.clone(), repos.blocks())
            .await
            .unwrap();

        let dup = registry
            .register(config("TESTNET"), chain, repos.blocks())
            .await;
        assert!(matches!(
            dup,
            Err(IndexerError::Domain(DomainError::DuplicateNetwork(_)))
        ));

        let err = registry.get("NOPE").unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["TESTNET"]);
    }

    #[tokio::test]
    async fn test_stop_resolves_immediately_when_idle() {
        let state = NetworkState::new(config("TESTNET"), Arc::new(MockChain::new(0)), 0);
        let handle = state.request_stop().await;
        handle.wait().await.unwrap();
        assert!(state.stop_requested().await);

        state.clear_stop().await;
        assert!(!state.stop_requested().await);
        assert!(!state.stop_token().await.is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_task() {
        let state = Arc::new(NetworkState::new(
            config("TESTNET"),
            Arc::new(MockChain::new(0)),
            0,
        ));
        let token = state.begin_run().await.unwrap();
        assert!(matches!(
            state.begin_run().await,
            Err(IndexerError::AlreadyRunning(_))
        ));

        let handle = state.request_stop().await;
        assert!(token.is_cancelled());
        assert_eq!(state.phase().await, ScanPhase::Draining);

        let task_state = state.clone();
        tokio::spawn(async move {
            task_state.finish_run(ScanPhase::Idle).await;
        });

        handle.wait().await.unwrap();
        assert!(!state.is_running().await);
    }

    #[tokio::test]
    async fn test_overrides_replace_chain_token() {
        let mut cfg = config("TESTNET");
        cfg.decimals = Some(10);
        cfg.symbol = Some("CERE".into());
        let state = NetworkState::new(cfg, Arc::new(MockChain::new(0)), 0);
        let token = state.token();
        assert_eq!(token.decimals, 10);
        assert_eq!(token.symbol, "CERE");
    }

    #[test]
    fn test_cursor_clear() {
        let state = NetworkState::new(config("TESTNET"), Arc::new(MockChain::new(0)), 7);
        state.mark_scanned(8);
        assert_eq!(state.cursor(), 8);
        state.clear_cursor();
        assert_eq!(state.cursor(), 0);
    }
}
