//! Airdrop eligibility engine.
//!
//! Finds the holders of a token who have held continuously, without ever
//! selling, for the required period and computes each one's share of the
//! eligible pool. Remote calls go through a retrying, rate-limited chain
//! client with an on-disk memo cache; results land in an incrementally
//! rewritten CSV report.

pub mod types;
pub mod retry;
pub mod limiter;
pub mod cache;
pub mod chain;
pub mod analyzer;
pub mod orchestrator;
pub mod report;
pub mod pipeline;

pub use analyzer::{ProcessedWallets, WalletHistoryAnalyzer};
pub use cache::JsonFileCache;
pub use chain::{ChainDataClient, ChainDataSource, SignaturePage, SolanaRpcSource};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{BatchOrchestrator, BatchOutcome};
pub use pipeline::AirdropRun;
pub use report::ReportAccumulator;
pub use retry::RetryPolicy;
pub use types::{
    AirdropConfig, AnalysisOutcome, EligibilityRecord, RecordStatus, RecordUpdate, RunSummary,
    WalletAnalysis,
};

use std::path::PathBuf;

/// Builder for `AirdropConfig`.
pub struct AirdropConfigBuilder {
    config: AirdropConfig,
}

impl AirdropConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: AirdropConfig::default(),
        }
    }

    /// Set the tracked token mint.
    pub fn with_mint(mut self, mint: impl Into<String>) -> Self {
        self.config.mint = mint.into();
        self
    }

    /// Set the RPC endpoint and its request timeout.
    pub fn with_rpc(mut self, url: impl Into<String>, timeout_seconds: u64) -> Self {
        self.config.rpc_url = url.into();
        self.config.rpc_timeout_seconds = timeout_seconds;
        self
    }

    /// Set the outbound RPC quota.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rpc_requests_per_second = requests_per_second;
        self
    }

    /// Set the qualifying balance range.
    pub fn with_balance_range(mut self, min_tokens: f64, max_tokens: f64) -> Self {
        self.config.min_tokens = min_tokens;
        self.config.max_tokens = max_tokens;
        self
    }

    pub fn with_months_required(mut self, months: u32) -> Self {
        self.config.months_required = months;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set the batch size and the number of wallets analyzed at once.
    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.config.batch_size = batch_size;
        self.config.concurrency = concurrency;
        self
    }

    /// Set the retry attempt count and backoff bounds in milliseconds.
    pub fn with_retry(mut self, attempts: usize, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.retry_attempts = attempts;
        self.config.retry_min_delay_ms = min_delay_ms;
        self.config.retry_max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_cache_debounce(mut self, debounce_ms: u64) -> Self {
        self.config.cache_debounce_ms = debounce_ms;
        self
    }

    /// Set the transaction detail pacing.
    pub fn with_detail_pacing(mut self, batch_size: usize, delay_ms: u64) -> Self {
        self.config.detail_batch_size = batch_size;
        self.config.detail_batch_delay_ms = delay_ms;
        self
    }

    pub fn with_signature_page_size(mut self, page_size: usize) -> Self {
        self.config.signature_page_size = page_size;
        self
    }

    pub fn with_share_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.share_chunk_size = chunk_size;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.config.progress_every = every;
        self
    }

    pub fn with_reuse_cached_holders(mut self, reuse: bool) -> Self {
        self.config.reuse_cached_holders = reuse;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> anyhow::Result<AirdropConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validating it.
    pub fn build_config(self) -> AirdropConfig {
        self.config
    }
}

impl Default for AirdropConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
