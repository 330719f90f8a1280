//! Tessera - multi-network Substrate block and transaction indexer.
//!
//! # Usage
//!
//! ```bash
//! # Index two networks
//! NETWORKS='[{"name":"MAINNET","url":"wss://rpc.mainnet.example"},{"name":"TESTNET","url":"wss://rpc.testnet.example"}]' \
//! DATABASE_URL=postgres://localhost/tessera tessera
//!
//! # List transaction hashes stored twice since a date
//! tessera --duplicates TESTNET --since 2024-01-01T00:00:00Z
//! ```

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures::future::join_all;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tessera_core::error::DomainError;
use tessera_core::metrics::init_metrics;
use tessera_core::ports::Repositories;
use tessera_core::registry::{NetworkConfig, NetworkRegistry};
use tessera_core::services::{IndexerConfig, IndexerService, RetryPolicy};
use tessera_storage::{Database, DatabaseConfig, PgRepositories};
use tessera_substrate::{SubstrateClient, SubstrateClientConfig};

/// Connection attempts per network at startup when `MAX_RETRIES` is unset.
const STARTUP_CONNECT_ATTEMPTS: u32 = 5;

/// Tessera CLI - Substrate multi-network indexer.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Tessera - multi-network Substrate block and transaction indexer")]
#[command(version)]
struct Cli {
    /// Networks to index, as a JSON array of `{"name", "url", "decimals"?, "symbol"?}`.
    #[arg(long, env = "NETWORKS", default_value = "[]")]
    networks: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/tessera"
    )]
    database_url: String,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Initial delay before retrying a failed network, in milliseconds.
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    retry_delay_ms: u64,

    /// Upper bound of the retry delay, in seconds.
    #[arg(long, env = "MAX_RETRY_DELAY_SECS", default_value = "30")]
    max_retry_delay_secs: u64,

    /// Consecutive failures after which a network stops retrying.
    #[arg(long, env = "MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Upper bound of every RPC call, in seconds.
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data of every network and exit.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Print transaction hashes stored more than once for this network and exit.
    #[arg(long, value_name = "NETWORK")]
    duplicates: Option<String>,

    /// Only consider transactions at or after this RFC 3339 time (with --duplicates).
    #[arg(long, requires = "duplicates")]
    since: Option<DateTime<Utc>>,
}

impl Cli {
    fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(self.retry_delay_ms),
                max_delay: Duration::from_secs(self.max_retry_delay_secs),
                max_retries: self.max_retries,
            },
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let networks = parse_networks(&cli.networks)?;

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Tessera Indexer");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url, networks.len()))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // A diagnostic run only needs the network it inspects.
    let selected: Vec<NetworkConfig> = match &cli.duplicates {
        Some(name) => {
            let network = networks
                .into_iter()
                .find(|n| &n.name == name)
                .ok_or_else(|| DomainError::UnknownNetwork(name.clone()))?;
            vec![network]
        }
        None => networks,
    };

    if selected.is_empty() {
        bail!("No networks configured, set NETWORKS");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 SUBSTRATE CONNECTIONS
    // ─────────────────────────────────────────────────────────────────────────
    let config = cli.indexer_config();
    let attempts = config
        .retry
        .max_retries
        .map_or(STARTUP_CONNECT_ATTEMPTS, |max| max.saturating_add(1));
    let connected = connect_networks(selected, &config.retry, attempts, |network| async move {
        info!(network = %network.name, "📡 Connecting to Substrate node...");
        SubstrateClient::connect(SubstrateClientConfig {
            network: network.name.clone(),
            ws_url: network.url.clone(),
            ..Default::default()
        })
        .await
        .with_context(|| format!("Failed to connect to network {}", network.name))
    })
    .await;

    let mut registry = NetworkRegistry::new();
    for (network, client) in connected {
        let state = registry
            .register(network, Arc::new(client), repositories.blocks())
            .await?;
        let token = state.token();
        info!(
            network = %state.name(),
            cursor = state.cursor(),
            symbol = %token.symbol,
            decimals = token.decimals,
            "🔗 Chain connected"
        );
    }

    if registry.is_empty() {
        bail!("No configured network could be reached");
    }

    let indexer = IndexerService::new(config, Arc::new(registry), repositories);

    if let Some(name) = &cli.duplicates {
        return handle_duplicates(&indexer, name, cli.since, &db).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    indexer.start().await;

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Tessera ready");
    info!(
        "   ⛓️  Networks: {}",
        indexer.registry().names().collect::<Vec<_>>().join(", ")
    );
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    indexer.shutdown(Duration::from_secs(30)).await;

    for status in indexer.status().await {
        debug!(network = %status.name, phase = %status.phase, cursor = status.cursor, "Final state");
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Connect every network concurrently.
///
/// A network that is still unreachable after `attempts` tries is logged and
/// left out, the others start without it.
async fn connect_networks<C, F, Fut>(
    networks: Vec<NetworkConfig>,
    retry: &RetryPolicy,
    attempts: u32,
    connect: F,
) -> Vec<(NetworkConfig, C)>
where
    F: Fn(NetworkConfig) -> Fut,
    Fut: Future<Output = Result<C>>,
{
    let results = join_all(networks.into_iter().map(|network| {
        let connect = &connect;
        async move {
            let result = retry
                .retry("Connection", attempts, || connect(network.clone()))
                .await;
            (network, result)
        }
    }))
    .await;

    let mut connected = Vec::new();
    for (network, result) in results {
        match result {
            Ok(client) => connected.push((network, client)),
            Err(e) => error!(network = %network.name, error = %e, "❌ Network unreachable, skipped"),
        }
    }
    connected
}

/// Parse the `NETWORKS` JSON array.
fn parse_networks(raw: &str) -> Result<Vec<NetworkConfig>> {
    let networks: Vec<NetworkConfig> =
        serde_json::from_str(raw).context("NETWORKS is not a valid JSON array of networks")?;

    let mut seen = std::collections::HashSet::new();
    for network in &networks {
        if network.name.is_empty() || network.url.is_empty() {
            bail!("Every network needs a name and a url");
        }
        if !seen.insert(network.name.as_str()) {
            bail!("Network {} is configured twice", network.name);
        }
    }

    Ok(networks)
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "❌ Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "❌ Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --duplicates command.
async fn handle_duplicates(
    indexer: &IndexerService<PgRepositories>,
    network: &str,
    since: Option<DateTime<Utc>>,
    db: &Database,
) -> Result<()> {
    let hashes = indexer.have_duplicates(network, since).await?;

    if hashes.is_empty() {
        info!(network, "✅ No duplicate transactions");
    } else {
        for hash in &hashes {
            println!("{hash}");
        }
    }

    db.close().await;
    Ok(())
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - All blocks and transactions of every network");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   📦 Blocks removed: {}", stats.blocks_removed);
    info!("   📝 Transactions removed: {}", stats.transactions_removed);
    info!("   Every network will start from block 0 on next run");

    Ok(())
}
