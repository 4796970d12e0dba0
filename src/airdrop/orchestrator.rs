//! Drives the holder list through the analyzer in fixed-size batches.

use crate::airdrop::analyzer::{ProcessedWallets, WalletHistoryAnalyzer};
use crate::airdrop::limiter::ConcurrencyLimiter;
use crate::airdrop::report::ReportAccumulator;
use crate::airdrop::types::{
    AirdropConfig, AnalysisOutcome, EligibilityRecord, RecordUpdate, RunSummary,
};
use crate::types::Holder;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Counters shared by the workers of one run.
#[derive(Debug, Default)]
struct Tally {
    processed: AtomicUsize,
    eligible: AtomicUsize,
    ineligible: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

#[derive(Debug, Default)]
struct EligiblePool {
    records: Vec<EligibilityRecord>,
    total_balance: f64,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Eligible holders, largest balance first
    pub eligible: Vec<EligibilityRecord>,
    /// Sum of the eligible holders' current balances
    pub total_eligible_balance: f64,
    pub summary: RunSummary,
}

pub struct BatchOrchestrator {
    analyzer: WalletHistoryAnalyzer,
    report: ReportAccumulator,
    config: Arc<AirdropConfig>,
    now: DateTime<Utc>,
}

impl BatchOrchestrator {
    pub fn new(
        analyzer: WalletHistoryAnalyzer,
        report: ReportAccumulator,
        config: Arc<AirdropConfig>,
    ) -> Self {
        Self {
            analyzer,
            report,
            config,
            now: Utc::now(),
        }
    }

    /// Evaluate holding periods against `now` instead of the wall clock.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Analyze every holder, `batch_size` at a time with at most
    /// `concurrency` wallets in flight. Per-holder failures are counted and
    /// recorded; they never abort the run.
    pub async fn run(&self, holders: &[Holder]) -> BatchOutcome {
        let processed = ProcessedWallets::new();
        let tally = Tally::default();
        let pool = Mutex::new(EligiblePool::default());
        let limiter = ConcurrencyLimiter::new(self.config.concurrency);

        let batch_size = self.config.batch_size.max(1);
        let batch_count = holders.len().div_ceil(batch_size);

        for (index, batch) in holders.chunks(batch_size).enumerate() {
            info!(
                "Processing batch {}/{} ({} holders)",
                index + 1,
                batch_count,
                batch.len()
            );

            let results = limiter
                .run(batch, |holder| {
                    self.process_holder(holder, &processed, &tally, &pool, holders.len())
                })
                .await;

            for (holder, result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    tally.errors.fetch_add(1, Ordering::SeqCst);
                    error!("Worker for {} failed: {:#}", holder.owner, e);
                }
            }
        }

        let EligiblePool {
            mut records,
            total_balance,
        } = pool.into_inner();
        records.sort_by(|a, b| {
            b.current_balance
                .total_cmp(&a.current_balance)
                .then_with(|| a.owner.cmp(&b.owner))
        });

        let summary = RunSummary {
            total_holders: holders.len(),
            processed: tally.processed.load(Ordering::SeqCst),
            eligible: tally.eligible.load(Ordering::SeqCst),
            ineligible: tally.ineligible.load(Ordering::SeqCst),
            skipped: tally.skipped.load(Ordering::SeqCst),
            errors: tally.errors.load(Ordering::SeqCst),
            total_eligible_balance: total_balance,
            report_path: None,
        };

        BatchOutcome {
            eligible: records,
            total_eligible_balance: total_balance,
            summary,
        }
    }

    async fn process_holder(
        &self,
        holder: &Holder,
        processed: &ProcessedWallets,
        tally: &Tally,
        pool: &Mutex<EligiblePool>,
        total: usize,
    ) -> Result<()> {
        let outcome = self
            .analyzer
            .analyze(&holder.owner, holder.amount, processed, self.now)
            .await;

        match outcome {
            AnalysisOutcome::Skipped => {
                tally.skipped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            AnalysisOutcome::Failed(e) => {
                tally.errors.fetch_add(1, Ordering::SeqCst);
                warn!("Analysis of {} failed: {:#}", holder.owner, e);
                self.report
                    .upsert(&holder.owner, RecordUpdate::from_failure(holder.amount))
                    .await;
            }
            AnalysisOutcome::Analyzed(analysis) => {
                let update = RecordUpdate::from_analysis(&analysis).with_balance(holder.amount);
                if analysis.is_eligible {
                    tally.eligible.fetch_add(1, Ordering::SeqCst);
                    let mut record = EligibilityRecord::new(holder.owner.clone());
                    record.merge(update.clone());

                    let mut pool = pool.lock().await;
                    pool.total_balance += holder.amount;
                    pool.records.push(record);
                } else {
                    tally.ineligible.fetch_add(1, Ordering::SeqCst);
                }
                self.report.upsert(&holder.owner, update).await;
            }
        }

        let done = tally.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.config.progress_every.max(1);
        if done % every == 0 || done == total {
            info!(
                "Progress: {}/{} processed, {} eligible, {} errors",
                done,
                total,
                tally.eligible.load(Ordering::SeqCst),
                tally.errors.load(Ordering::SeqCst)
            );
        }
        Ok(())
    }
}
