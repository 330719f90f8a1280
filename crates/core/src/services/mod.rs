//! Scanning, lifecycle and query services.

pub mod correlator;
pub mod decoder;
pub mod fetcher;
mod indexer;
mod query;
mod scanner;

pub use correlator::{PhaseEvents, TRACKED_METHODS, build_transactions, correlate, extract_pays_fee};
pub use decoder::{CallDecoder, MAX_CALL_DEPTH, TRANSFER_METHODS, method_name, render_args};
pub use fetcher::{BlockFetcher, DecodedExtrinsic, FetchedBlock, resolve_author, with_timeout};
pub use indexer::{IndexerConfig, IndexerService, NetworkStatus, RetryPolicy};
pub use query::{QueryService, format_balance};
pub use scanner::Scanner;
