//! One end-to-end eligibility run: holders, analysis, shares, report.

use crate::airdrop::analyzer::WalletHistoryAnalyzer;
use crate::airdrop::cache::JsonFileCache;
use crate::airdrop::chain::{ChainDataClient, ChainDataSource, SolanaRpcSource};
use crate::airdrop::orchestrator::BatchOrchestrator;
use crate::airdrop::report::ReportAccumulator;
use crate::airdrop::types::{AirdropConfig, RecordUpdate, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AirdropRun {
    config: Arc<AirdropConfig>,
    client: ChainDataClient,
    now: Option<DateTime<Utc>>,
}

impl AirdropRun {
    /// Validate `config` and wire the cache and chain client around `source`.
    pub fn new(config: AirdropConfig, source: Arc<dyn ChainDataSource>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let config = Arc::new(config);
        let cache = JsonFileCache::new(
            config.cache_path(),
            Duration::from_millis(config.cache_debounce_ms),
        );
        let client = ChainDataClient::new(source, cache, config.clone());
        Ok(Self {
            config,
            client,
            now: None,
        })
    }

    /// Run against Solana JSON-RPC.
    pub fn with_rpc(config: AirdropConfig) -> Result<Self> {
        let source: Arc<dyn ChainDataSource> = Arc::new(SolanaRpcSource::new(&config));
        Self::new(config, source)
    }

    /// Pin the clock used for holding periods.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &AirdropConfig {
        &self.config
    }

    /// Execute the run. Directory creation and the holder fetch are fatal;
    /// everything after that degrades per wallet.
    pub async fn execute(&self) -> Result<RunSummary> {
        let config = &self.config;
        info!(
            "Checking holders of {} ({} - {} tokens, {} months)",
            config.mint, config.min_tokens, config.max_tokens, config.months_required
        );

        for dir in [&config.output_dir, &config.cache_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        let holders = self.client.holders().await?;

        let report = ReportAccumulator::new(config.report_path(), config.share_chunk_size);
        let mut seeded = HashSet::new();
        for holder in &holders {
            if seeded.insert(holder.owner.as_str()) {
                report
                    .upsert(&holder.owner, RecordUpdate::from_holder(holder))
                    .await;
            }
        }
        report.flush().await?;
        info!(
            "Seeded {} report rows at {}",
            seeded.len(),
            report.path().display()
        );

        let analyzer = WalletHistoryAnalyzer::new(self.client.clone(), config.clone());
        let orchestrator = BatchOrchestrator::new(analyzer, report.clone(), config.clone());
        let orchestrator = match self.now {
            Some(now) => orchestrator.with_now(now),
            None => orchestrator,
        };
        let outcome = orchestrator.run(&holders).await;

        report.finalize_shares(outcome.total_eligible_balance).await;
        report.flush().await?;
        if let Err(e) = self.client.cache().flush().await {
            warn!("Final cache write failed: {:#}", e);
        }

        let mut summary = outcome.summary;
        summary.report_path = Some(report.path().to_path_buf());
        info!(
            "Run complete: {} holders, {} processed, {} eligible, {} ineligible, {} skipped, {} errors",
            summary.total_holders,
            summary.processed,
            summary.eligible,
            summary.ineligible,
            summary.skipped,
            summary.errors
        );
        info!(
            "Eligible pool: {} tokens, report at {}",
            summary.total_eligible_balance,
            report.path().display()
        );
        Ok(summary)
    }
}
