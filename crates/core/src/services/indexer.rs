//! Core indexer service - runs and supervises one scan task per network.
//!
//! Each configured network gets an independent task. A task that fails is
//! retried with exponential backoff; other networks are never affected.
//! Restarts stop a single network, wait for its task to return, wipe its
//! rows and relaunch it from height 1.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::error::IndexerResult;
use crate::metrics::{record_network_restart, record_scan_failure};
use crate::models::ExtrinsicHash;
use crate::ports::Repositories;
use crate::registry::{NetworkRegistry, NetworkState, ScanPhase};

use super::query::QueryService;
use super::scanner::Scanner;

// =============================================================================
// Configuration
// =============================================================================

/// Backoff applied between failed scan attempts of a network.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the network is parked in
    /// [`ScanPhase::Failed`]. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    /// Double the delay, up to the maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }

    /// Run `attempt` until it succeeds, backing off between failures.
    ///
    /// Gives up after `attempts` failures and returns the last error.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, attempts: u32, mut attempt: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.initial_delay;
        let mut failures = 0u32;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    failures += 1;
                    if failures >= attempts.max(1) {
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        attempt = failures,
                        retry_in_ms = delay.as_millis(),
                        "⚠️  {operation} failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.next_delay(delay);
                }
            }
        }
    }
}

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub retry: RetryPolicy,
    /// Upper bound of every RPC call.
    pub rpc_timeout: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    pub name: String,
    pub phase: ScanPhase,
    pub cursor: u64,
}

// =============================================================================
// IndexerService
// =============================================================================

struct Inner<R> {
    config: IndexerConfig,
    registry: Arc<NetworkRegistry>,
    repositories: Arc<R>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Serializes restarts.
    lifecycle: Mutex<()>,
}

/// Multi-network indexer.
///
/// # Flow
///
/// 1. `start()` spawns one supervised scan task per registered network
/// 2. Each task catches up from its cursor, then follows new heads
/// 3. `restart(network)` drains, wipes and relaunches a single network
/// 4. `shutdown()` drains every network
pub struct IndexerService<R: Repositories> {
    inner: Arc<Inner<R>>,
}

impl<R: Repositories> Clone for IndexerService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Repositories + 'static> IndexerService<R> {
    pub fn new(
        config: IndexerConfig,
        registry: Arc<NetworkRegistry>,
        repositories: Arc<R>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                repositories,
                tasks: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.inner.registry
    }

    /// Read-side operations over the same registry and repositories.
    pub fn queries(&self) -> QueryService<R> {
        QueryService::new(
            self.inner.registry.clone(),
            self.inner.repositories.clone(),
            self.inner.config.rpc_timeout,
        )
    }

    /// Launch the scan task of every registered network.
    pub async fn start(&self) {
        info!(networks = self.inner.registry.len(), "⛓️  Starting indexer");
        for state in self.inner.registry.states() {
            self.spawn(state.clone()).await;
        }
    }

    async fn spawn(&self, state: Arc<NetworkState>) {
        let span = info_span!("network", name = %state.name());
        let name = state.name().to_string();
        let handle = tokio::spawn(
            supervise(
                self.inner.config.clone(),
                self.inner.repositories.clone(),
                state,
            )
            .instrument(span),
        );
        self.inner.tasks.lock().await.insert(name, handle);
    }

    /// Wipe a network and scan it again from height 1.
    ///
    /// Unknown networks are rejected without side effects.
    #[instrument(skip(self))]
    pub async fn restart(&self, network: &str) -> IndexerResult<bool> {
        let state = self.inner.registry.get(network)?.clone();
        let _guard = self.inner.lifecycle.lock().await;

        info!("🔄 Restarting network");
        let stop = state.request_stop().await;
        let handle = self.inner.tasks.lock().await.remove(network);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            // a panicked task never reports back on its own
            warn!(error = %e, "⚠️  Scan task panicked");
            state.finish_run(ScanPhase::Failed).await;
        }
        stop.wait().await?;

        let stats = self.inner.repositories.wipe_network(network).await?;
        state.clear_cursor();
        state.set_phase(ScanPhase::Wiped).await;
        info!(
            blocks = stats.blocks,
            transactions = stats.transactions,
            "🗑️  Network data wiped"
        );

        state.clear_stop().await;
        record_network_restart(network);
        self.spawn(state).await;
        Ok(true)
    }

    /// Transaction hashes stored more than once for a network.
    pub async fn have_duplicates(
        &self,
        network: &str,
        since: Option<DateTime<Utc>>,
    ) -> IndexerResult<Vec<ExtrinsicHash>> {
        self.inner.registry.get(network)?;
        let hashes = self
            .inner
            .repositories
            .transactions()
            .duplicate_hashes(network, since)
            .await?;
        if !hashes.is_empty() {
            warn!(network, count = hashes.len(), "⚠️  Duplicate transactions found");
        }
        Ok(hashes)
    }

    pub async fn status(&self) -> Vec<NetworkStatus> {
        let mut out = Vec::with_capacity(self.inner.registry.len());
        for state in self.inner.registry.states() {
            out.push(NetworkStatus {
                name: state.name().to_string(),
                phase: state.phase().await,
                cursor: state.cursor(),
            });
        }
        out
    }

    /// Stop every network and wait for their tasks, at most `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("🛑 Stopping indexer");
        let mut handles = Vec::new();
        for state in self.inner.registry.states() {
            handles.push(state.request_stop().await);
        }

        let waits = join_all(handles.into_iter().map(|handle| handle.wait()));
        match tokio::time::timeout(timeout, waits).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "⚠️  Network stopped uncleanly");
                    }
                }
                debug!("All networks stopped");
            }
            Err(_) => warn!(
                timeout_secs = timeout.as_secs(),
                "⚠️  Timed out waiting for networks to stop"
            ),
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Run a network's scanner until it is stopped, retrying failures.
async fn supervise<R: Repositories>(
    config: IndexerConfig,
    repositories: Arc<R>,
    state: Arc<NetworkState>,
) {
    let token = match state.begin_run().await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "⚠️  Scan task not started");
            return;
        }
    };

    let retry = &config.retry;
    let mut delay = retry.initial_delay;
    let mut failures = 0u32;

    let exit = loop {
        let before = state.cursor();
        let scanner = Scanner::new(
            state.as_ref(),
            repositories.as_ref(),
            config.rpc_timeout,
            token.clone(),
        );

        let Err(e) = scanner.run().await else {
            info!(cursor = state.cursor(), "🛑 Network stopped");
            break ScanPhase::Idle;
        };

        record_scan_failure(state.name());
        if state.cursor() != before {
            // progress was made, start a fresh backoff cycle
            delay = retry.initial_delay;
            failures = 0;
        }
        failures += 1;

        if let Some(max) = retry.max_retries
            && failures > max
        {
            error!(error = %e, failures, "❌ Network failed too many times, giving up until restart");
            break ScanPhase::Failed;
        }

        warn!(
            error = %e,
            attempt = failures,
            retry_in_ms = delay.as_millis(),
            "⚠️  Scan failed, retrying..."
        );
        state.set_phase(ScanPhase::Retrying).await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                delay = retry.next_delay(delay);
            }
            _ = token.cancelled() => {
                debug!("Stop observed during backoff");
                break ScanPhase::Idle;
            }
        }
    };

    state.finish_run(exit).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{BlockRepository, TransactionRepository};
    use crate::registry::NetworkConfig;
    use crate::testing::{MemoryRepositories, MockChain, block_record, wait_until};

    fn config(name: &str) -> NetworkConfig {
        NetworkConfig {
            name: name.into(),
            url: "ws://mock".into(),
            decimals: None,
            symbol: None,
        }
    }

    fn fast_config() -> IndexerConfig {
        IndexerConfig {
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                max_retries: None,
            },
            rpc_timeout: Duration::from_secs(1),
        }
    }

    async fn service(
        networks: Vec<(&str, Arc<MockChain>)>,
        repos: Arc<MemoryRepositories>,
        config: IndexerConfig,
    ) -> IndexerService<MemoryRepositories> {
        let mut registry = NetworkRegistry::new();
        for (name, chain) in networks {
            registry
                .register(self::config(name), chain, repos.blocks())
                .await
                .unwrap();
        }
        IndexerService::new(config, Arc::new(registry), repos)
    }

    fn cursor_of(service: &IndexerService<MemoryRepositories>, name: &str) -> u64 {
        service.registry().get(name).unwrap().cursor()
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let policy = RetryPolicy::default();
        let mut delay = policy.initial_delay;
        for _ in 0..10 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, policy.max_delay);
        assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let policy = fast_config().retry;
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), String> = policy
            .retry("Connection", 3, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let result: Result<u32, String> = policy
            .retry("Connection", 3, move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("refused".to_string()),
                    n => Ok(n),
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_catch_up_then_live() {
        let chain = Arc::new(MockChain::new(103));
        let repos = Arc::new(MemoryRepositories::default());
        repos.blocks().insert_block(&block_record("TESTNET", 100)).await.unwrap();

        let service = service(vec![("TESTNET", chain.clone())], repos.clone(), fast_config()).await;
        service.start().await;

        wait_until(|| cursor_of(&service, "TESTNET") == 103).await;
        assert_eq!(repos.block_numbers("TESTNET"), vec![100, 101, 102, 103]);
        assert_eq!(service.queries().latest_block("TESTNET").await.unwrap(), Some(103));

        chain.wait_for_subscribers(1).await;
        chain.produce_block();
        wait_until(|| cursor_of(&service, "TESTNET") == 104).await;
        assert_eq!(repos.block_numbers("TESTNET"), vec![100, 101, 102, 103, 104]);

        service.shutdown(Duration::from_secs(1)).await;
        let status = service.status().await;
        assert_eq!(status[0].phase, ScanPhase::Idle);
    }

    #[tokio::test]
    async fn test_restart_wipes_one_network() {
        let testnet = Arc::new(MockChain::new(5));
        let mainnet = Arc::new(MockChain::new(3));
        testnet.push_transfer(2, "5Grw...", "1000000000000");
        let repos = Arc::new(MemoryRepositories::default());

        let service = service(
            vec![("TESTNET", testnet.clone()), ("MAINNET", mainnet.clone())],
            repos.clone(),
            fast_config(),
        )
        .await;
        service.start().await;
        wait_until(|| cursor_of(&service, "TESTNET") == 5 && cursor_of(&service, "MAINNET") == 3)
            .await;

        // keep the relaunched scan from writing
        testnet.set_failing(true);
        assert!(service.restart("TESTNET").await.unwrap());

        assert!(repos.block_numbers("TESTNET").is_empty());
        assert_eq!(repos.transaction_count("TESTNET"), 0);
        assert_eq!(cursor_of(&service, "TESTNET"), 0);
        assert_eq!(repos.block_numbers("MAINNET"), vec![1, 2, 3]);

        testnet.set_failing(false);
        wait_until(|| cursor_of(&service, "TESTNET") == 5).await;
        assert_eq!(repos.block_numbers("TESTNET"), vec![1, 2, 3, 4, 5]);
        assert_eq!(repos.transaction_count("TESTNET"), 1);

        service.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_restart_rejects_unknown_network() {
        let repos = Arc::new(MemoryRepositories::default());
        let service = service(
            vec![("TESTNET", Arc::new(MockChain::new(1)))],
            repos,
            fast_config(),
        )
        .await;
        let err = service.restart("NOPE").await.unwrap_err();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("Invalid network type"));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_retried() {
        let broken = Arc::new(MockChain::new(4));
        let healthy = Arc::new(MockChain::new(4));
        broken.set_failing(true);
        let repos = Arc::new(MemoryRepositories::default());

        let service = service(
            vec![("BROKEN", broken.clone()), ("HEALTHY", healthy)],
            repos.clone(),
            fast_config(),
        )
        .await;
        service.start().await;

        wait_until(|| cursor_of(&service, "HEALTHY") == 4).await;
        assert!(repos.block_numbers("BROKEN").is_empty());

        broken.set_failing(false);
        wait_until(|| cursor_of(&service, "BROKEN") == 4).await;
        service.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_max_retries_parks_network() {
        let chain = Arc::new(MockChain::new(4));
        chain.set_failing(true);
        let repos = Arc::new(MemoryRepositories::default());
        let mut config = fast_config();
        config.retry.max_retries = Some(2);

        let service = service(vec![("TESTNET", chain.clone())], repos.clone(), config).await;
        service.start().await;

        let state = service.registry().get("TESTNET").unwrap().clone();
        for _ in 0..200 {
            if state.phase().await == ScanPhase::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.phase().await, ScanPhase::Failed);
        assert!(!state.is_running().await);

        // a restart resumes it
        chain.set_failing(false);
        service.restart("TESTNET").await.unwrap();
        wait_until(|| cursor_of(&service, "TESTNET") == 4).await;
        service.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_have_duplicates() {
        let repos = Arc::new(MemoryRepositories::default());
        let service = service(
            vec![("TESTNET", Arc::new(MockChain::new(1)))],
            repos.clone(),
            fast_config(),
        )
        .await;
        assert!(service.have_duplicates("TESTNET", None).await.unwrap().is_empty());

        let tx = crate::testing::transaction_record("TESTNET", 7, "5Sender");
        repos.transactions().insert_transaction(&tx).await.unwrap();
        repos.force_insert_transaction(tx.clone());

        let dups = service.have_duplicates("TESTNET", None).await.unwrap();
        assert_eq!(dups, vec![tx.transaction_hash]);

        let later = tx.timestamp + chrono::Duration::hours(1);
        assert!(service.have_duplicates("TESTNET", Some(later)).await.unwrap().is_empty());

        assert!(service.have_duplicates("NOPE", None).await.unwrap_err().is_rejection());
    }

    #[tokio::test]
    async fn test_restart_recovers_panicked_task() {
        let chain = Arc::new(MockChain::new(3));
        chain.set_panicking(true);
        let repos = Arc::new(MemoryRepositories::default());

        let service = service(vec![("TESTNET", chain.clone())], repos.clone(), fast_config()).await;
        service.start().await;

        let state = service.registry().get("TESTNET").unwrap().clone();
        for _ in 0..200 {
            let finished = service.inner.tasks.lock().await["TESTNET"].is_finished();
            if finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // the task died without clearing its running flag
        assert!(state.is_running().await);

        chain.set_panicking(false);
        assert!(service.restart("TESTNET").await.unwrap());
        wait_until(|| cursor_of(&service, "TESTNET") == 3).await;
        assert_eq!(repos.block_numbers("TESTNET"), vec![1, 2, 3]);

        service.shutdown(Duration::from_secs(1)).await;
        assert!(!state.is_running().await);
    }
}
