//! Read-side operations over indexed data.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{DomainError, IndexerError, IndexerResult};
use crate::models::{AccountTransactions, BlockRecord, Page, PageRequest};
use crate::ports::Repositories;
use crate::registry::NetworkRegistry;

use super::fetcher::with_timeout;

/// Account and chain queries, scoped to a configured network.
pub struct QueryService<R: Repositories> {
    registry: Arc<NetworkRegistry>,
    repositories: Arc<R>,
    rpc_timeout: Duration,
}

impl<R: Repositories> QueryService<R> {
    pub fn new(registry: Arc<NetworkRegistry>, repositories: Arc<R>, rpc_timeout: Duration) -> Self {
        Self {
            registry,
            repositories,
            rpc_timeout,
        }
    }

    /// Blocks authored by `account`.
    pub async fn account_blocks(
        &self,
        account: &str,
        network: &str,
        page: PageRequest,
    ) -> IndexerResult<Page<BlockRecord>> {
        self.registry.get(network)?;
        let account = validate_account(account)?;
        Ok(self
            .repositories
            .blocks()
            .list_blocks_by_author(account, network, page)
            .await?)
    }

    /// Transactions sent by `account`, newest first, with its balance.
    pub async fn account_transactions(
        &self,
        account: &str,
        network: &str,
        page: PageRequest,
    ) -> IndexerResult<AccountTransactions> {
        self.registry.get(network)?;
        let account = validate_account(account)?;
        let (transactions, balance) = tokio::try_join!(
            async {
                Ok::<_, IndexerError>(
                    self.repositories
                        .transactions()
                        .list_transactions_by_sender(account, network, page)
                        .await?,
                )
            },
            self.balance(account, network),
        )?;
        Ok(AccountTransactions {
            transactions,
            balance,
        })
    }

    /// Highest stored block of a network.
    pub async fn latest_block(&self, network: &str) -> IndexerResult<Option<u64>> {
        self.registry.get(network)?;
        Ok(self.repositories.blocks().latest_block_number(network).await?)
    }

    /// Free balance of `address`, formatted with the network's token.
    pub async fn balance(&self, address: &str, network: &str) -> IndexerResult<String> {
        let state = self.registry.get(network)?;
        let address = validate_account(address)?;
        let raw = with_timeout(
            self.rpc_timeout,
            "system_account",
            state.chain().free_balance(address),
        )
        .await?;
        let token = state.token();
        Ok(format_balance(raw, token.decimals, &token.symbol))
    }
}

fn validate_account(account: &str) -> IndexerResult<&str> {
    let account = account.trim();
    if account.is_empty() {
        return Err(DomainError::InvalidAccountId("empty account".into()).into());
    }
    Ok(account)
}

/// Format a raw balance with `decimals` fractional digits.
///
/// Trailing fractional zeros are trimmed: `12_345_000_000_000` with 12
/// decimals is `"12.345 UNIT"`.
pub fn format_balance(raw: u128, decimals: u8, symbol: &str) -> String {
    let digits = raw.to_string();
    let decimals = decimals as usize;

    let (whole, fraction) = if decimals == 0 {
        (digits, String::new())
    } else {
        let padded = format!("{:0>width$}", digits, width = decimals + 1);
        let split = padded.len() - decimals;
        let fraction = padded[split..].trim_end_matches('0').to_string();
        (padded[..split].to_string(), fraction)
    };

    let amount = if fraction.is_empty() {
        whole
    } else {
        format!("{whole}.{fraction}")
    };
    if symbol.is_empty() {
        amount
    } else {
        format!("{amount} {symbol}")
    }
}
