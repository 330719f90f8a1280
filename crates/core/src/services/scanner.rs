//! Sequential block scanning for one network.
//!
//! A [`Scanner`] alternates between two loops until it is stopped:
//!
//! 1. **Catch-up**: scan `cursor + 1` until the cursor reaches the chain head,
//!    re-reading the head after every block.
//! 2. **Live**: scan each new head as it is announced. If a head is not
//!    exactly `cursor + 1` the scanner falls back to catch-up rather than
//!    scanning out of order.
//!
//! Blocks are strictly sequential: block `N + 1` is not fetched before block
//! `N` and its transactions are persisted. The stop token is polled between
//! blocks, so a stop takes at most one block's processing time.

use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::error::{ChainError, IndexerResult};
use crate::metrics::{ProcessingTimer, record_block_scanned, record_transactions_stored};
use crate::models::BlockHash;
use crate::ports::Repositories;
use crate::registry::{NetworkState, ScanPhase};

use super::correlator::{build_transactions, correlate};
use super::fetcher::{BlockFetcher, with_timeout};

/// How a scan loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    CaughtUp,
    FellBehind,
}

/// Scans the blocks of one network.
pub struct Scanner<'a, R: Repositories + ?Sized> {
    state: &'a NetworkState,
    repos: &'a R,
    rpc_timeout: Duration,
    token: CancellationToken,
}

impl<'a, R: Repositories + ?Sized> Scanner<'a, R> {
    pub fn new(
        state: &'a NetworkState,
        repos: &'a R,
        rpc_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            state,
            repos,
            rpc_timeout,
            token,
        }
    }

    fn network(&self) -> &str {
        self.state.name()
    }

    fn stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Scan until stopped. Returns `Ok(())` only once a stop was observed.
    pub async fn run(&self) -> IndexerResult<()> {
        loop {
            if self.catch_up().await? == LoopExit::Stopped {
                return Ok(());
            }
            match self.follow_heads().await? {
                LoopExit::Stopped => return Ok(()),
                LoopExit::FellBehind | LoopExit::CaughtUp => continue,
            }
        }
    }

    /// Backfill from the cursor to the chain head.
    #[instrument(skip_all, fields(network = %self.network(), from = self.state.cursor()))]
    async fn catch_up(&self) -> IndexerResult<LoopExit> {
        self.state.set_phase(ScanPhase::CatchingUp).await;
        let mut head = self.best_head().await?;
        debug!(head, "Catching up");

        loop {
            if self.stopping() {
                debug!("Stop observed during catch-up");
                return Ok(LoopExit::Stopped);
            }

            let cursor = self.state.cursor();
            if cursor >= head {
                info!(height = cursor, "📡 Caught up with chain head");
                return Ok(LoopExit::CaughtUp);
            }

            self.scan_height(cursor + 1).await?;
            head = self.best_head().await?;
        }
    }

    /// Scan each announced head until stopped or out of order.
    #[instrument(skip_all, fields(network = %self.network()))]
    async fn follow_heads(&self) -> IndexerResult<LoopExit> {
        self.state.set_phase(ScanPhase::Live).await;
        let mut heads = with_timeout(
            self.rpc_timeout,
            "subscribe_new_heads",
            self.state.chain().subscribe_new_heads(),
        )
        .await?;
        debug!("📡 Subscribed to new heads");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(LoopExit::Stopped),
                next = heads.next() => next,
            };

            let head = match next {
                Some(Ok(head)) => head,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ChainError::SubscriptionError("head stream ended".into()).into());
                }
            };

            let cursor = self.state.cursor();
            if head.number <= cursor {
                trace!(head = head.number, cursor, "Head already scanned");
                continue;
            }
            if head.number != cursor + 1 {
                debug!(head = head.number, cursor, "Fell behind chain head");
                return Ok(LoopExit::FellBehind);
            }

            self.scan_block(head.number, head.hash).await?;

            if self.stopping() {
                return Ok(LoopExit::Stopped);
            }
        }
    }

    async fn best_head(&self) -> IndexerResult<u64> {
        Ok(with_timeout(self.rpc_timeout, "best_head", self.state.chain().best_head()).await?)
    }

    async fn scan_height(&self, height: u64) -> IndexerResult<()> {
        let hash = with_timeout(
            self.rpc_timeout,
            "chain_getBlockHash",
            self.state.chain().block_hash(height),
        )
        .await?
        .ok_or(ChainError::UnknownHeight(height))?;

        self.scan_block(height, hash).await
    }

    /// Fetch, correlate and persist one block, then advance the cursor.
    async fn scan_block(&self, height: u64, hash: BlockHash) -> IndexerResult<()> {
        let _timer = ProcessingTimer::new(self.network());
        let chain = self.state.chain().as_ref();

        let fetched = BlockFetcher::new(chain, self.network(), self.rpc_timeout)
            .fetch(hash)
            .await?;
        let mut extrinsics = fetched.extrinsics;
        let phases = correlate(&mut extrinsics, fetched.events, self.network(), height);
        let transactions = build_transactions(&extrinsics, &fetched.record);

        // the block row marks the height as scanned, so it is written last
        let results = join_all(
            transactions
                .iter()
                .map(|tx| self.repos.transactions().insert_transaction(tx)),
        )
        .await;
        let mut stored = 0u64;
        for result in results {
            if result? {
                stored += 1;
            }
        }

        let inserted = self.repos.blocks().insert_block(&fetched.record).await?;
        if !inserted {
            debug!(block = height, "Block already stored");
        }

        self.state.mark_scanned(height);
        record_block_scanned(self.network(), height);
        if stored > 0 {
            record_transactions_stored(self.network(), stored);
        }

        info!(
            block = height,
            extrinsics = extrinsics.len(),
            transactions = stored,
            dropped_events = phases.dropped,
            "⛓️  Block indexed"
        );
        Ok(())
    }
}
