//! Configuration, analysis results and report records for the airdrop run.

use crate::types::{Holder, Pubkey};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Days counted per required month.
pub const DAYS_PER_MONTH: i64 = 30;

/// Placeholder shown in the share column until shares are finalized.
pub const SHARE_PENDING: &str = "pending";

/// Reason recorded for wallets whose history could not be fetched.
pub const REASON_ANALYSIS_ERROR: &str = "Error during analysis";

/// Run configuration. Built once at startup and handed to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirdropConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// RPC timeout in seconds
    pub rpc_timeout_seconds: u64,
    /// Outbound RPC quota
    pub rpc_requests_per_second: u32,
    /// Mint address of the tracked token
    pub mint: Pubkey,
    /// Minimum balance to qualify (also the holder list floor)
    pub min_tokens: f64,
    /// Maximum balance to qualify
    pub max_tokens: f64,
    /// Required holding period in months
    pub months_required: u32,
    /// Directory for the CSV report
    pub output_dir: PathBuf,
    /// Directory for the JSON cache file
    pub cache_dir: PathBuf,
    /// Holders per orchestrator batch
    pub batch_size: usize,
    /// Maximum wallets analyzed concurrently
    pub concurrency: usize,
    /// Attempts per remote call, including the first
    pub retry_attempts: usize,
    /// First backoff delay in milliseconds
    pub retry_min_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
    /// Cache write coalescing window in milliseconds
    pub cache_debounce_ms: u64,
    /// Signatures requested per page
    pub signature_page_size: usize,
    /// Transaction details fetched between pacing pauses
    pub detail_batch_size: usize,
    /// Pause between detail batches in milliseconds
    pub detail_batch_delay_ms: u64,
    /// Records updated per share-finalization chunk
    pub share_chunk_size: usize,
    /// Log progress every N processed wallets
    pub progress_every: usize,
    /// Reuse a holder list cached by a previous run instead of refetching
    pub reuse_cached_holders: bool,
}

impl Default for AirdropConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            rpc_timeout_seconds: 60,
            rpc_requests_per_second: 10,
            mint: String::new(),
            min_tokens: 50_000_000.0,
            max_tokens: 1_000_000_000.0,
            months_required: 3,
            output_dir: PathBuf::from("./output"),
            cache_dir: PathBuf::from("./cache"),
            batch_size: 50,
            concurrency: 5,
            retry_attempts: 5,
            retry_min_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            cache_debounce_ms: 5_000,
            signature_page_size: 1_000,
            detail_batch_size: 10,
            detail_batch_delay_ms: 200,
            share_chunk_size: 100,
            progress_every: 10,
            reuse_cached_holders: false,
        }
    }
}

impl AirdropConfig {
    /// Minimum holding period expressed in days.
    pub fn holding_days_required(&self) -> i64 {
        self.months_required as i64 * DAYS_PER_MONTH
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("cache_{}.json", self.mint))
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(format!("diamond_hands_{}.csv", self.mint))
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mint.trim().is_empty() {
            return Err(anyhow!("mint address is required"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(anyhow!("retry_attempts must be at least 1"));
        }
        if self.min_tokens > self.max_tokens {
            return Err(anyhow!(
                "min_tokens ({}) exceeds max_tokens ({})",
                self.min_tokens,
                self.max_tokens
            ));
        }
        if self.retry_min_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow!(
                "retry_min_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_min_delay_ms,
                self.retry_max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Eligibility verdict for one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAnalysis {
    pub is_eligible: bool,
    pub first_acquired: Option<DateTime<Utc>>,
    pub max_held: f64,
    pub has_sold: bool,
    pub holding_days: i64,
    pub reason: String,
}

impl WalletAnalysis {
    /// Verdict for a wallet whose history could not be retrieved.
    pub fn failed(current_balance: f64) -> Self {
        Self {
            is_eligible: false,
            first_acquired: None,
            max_held: current_balance,
            has_sold: false,
            holding_days: 0,
            reason: REASON_ANALYSIS_ERROR.to_string(),
        }
    }
}

/// Result of asking the analyzer about one holder.
#[derive(Debug)]
pub enum AnalysisOutcome {
    /// History was scanned and a verdict reached
    Analyzed(WalletAnalysis),
    /// The wallet was already handled earlier in this run
    Skipped,
    /// History could not be fetched after retries
    Failed(anyhow::Error),
}

/// Row state in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    Eligible,
    Ineligible,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Eligible => "ELIGIBLE",
            RecordStatus::Ineligible => "INELIGIBLE",
            RecordStatus::Error => "ERROR",
        }
    }
}

/// One report row: holder fields, analysis fields and the derived share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityRecord {
    pub owner: Pubkey,
    pub status: RecordStatus,
    pub current_balance: f64,
    pub max_held: Option<f64>,
    /// Only meaningful after share finalization
    pub airdrop_share_percent: Option<String>,
    pub holding_days: Option<i64>,
    pub first_acquired: Option<DateTime<Utc>>,
    pub has_sold: Option<bool>,
    pub reason: Option<String>,
    pub is_eligible: bool,
}

impl EligibilityRecord {
    pub fn new(owner: Pubkey) -> Self {
        Self {
            owner,
            status: RecordStatus::Pending,
            current_balance: 0.0,
            max_held: None,
            airdrop_share_percent: None,
            holding_days: None,
            first_acquired: None,
            has_sold: None,
            reason: None,
            is_eligible: false,
        }
    }

    /// Apply every field set in `update`, leaving the others untouched.
    pub fn merge(&mut self, update: RecordUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(balance) = update.current_balance {
            self.current_balance = balance;
        }
        if let Some(max_held) = update.max_held {
            self.max_held = Some(max_held);
        }
        if let Some(share) = update.airdrop_share_percent {
            self.airdrop_share_percent = Some(share);
        }
        if let Some(days) = update.holding_days {
            self.holding_days = Some(days);
        }
        if let Some(first) = update.first_acquired {
            self.first_acquired = first;
        }
        if let Some(sold) = update.has_sold {
            self.has_sold = Some(sold);
        }
        if let Some(reason) = update.reason {
            self.reason = Some(reason);
        }
        if let Some(eligible) = update.is_eligible {
            self.is_eligible = eligible;
        }
    }
}

/// Partial update for a report row. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub current_balance: Option<f64>,
    pub max_held: Option<f64>,
    pub airdrop_share_percent: Option<String>,
    pub holding_days: Option<i64>,
    /// Outer `Some` means "set", inner value may be unknown
    pub first_acquired: Option<Option<DateTime<Utc>>>,
    pub has_sold: Option<bool>,
    pub reason: Option<String>,
    pub is_eligible: Option<bool>,
}

impl RecordUpdate {
    /// Seed fields for a freshly listed holder.
    pub fn from_holder(holder: &Holder) -> Self {
        Self {
            status: Some(RecordStatus::Pending),
            current_balance: Some(holder.amount),
            ..Default::default()
        }
    }

    /// Fields carried by a completed analysis.
    pub fn from_analysis(analysis: &WalletAnalysis) -> Self {
        Self {
            status: Some(if analysis.is_eligible {
                RecordStatus::Eligible
            } else {
                RecordStatus::Ineligible
            }),
            max_held: Some(analysis.max_held),
            holding_days: Some(analysis.holding_days),
            first_acquired: Some(analysis.first_acquired),
            has_sold: Some(analysis.has_sold),
            reason: Some(analysis.reason.clone()),
            is_eligible: Some(analysis.is_eligible),
            ..Default::default()
        }
    }

    /// Fields for a wallet whose analysis failed.
    pub fn from_failure(current_balance: f64) -> Self {
        let mut update = Self::from_analysis(&WalletAnalysis::failed(current_balance))
            .with_balance(current_balance);
        update.status = Some(RecordStatus::Error);
        update
    }

    /// Also set the holder's current balance.
    pub fn with_balance(mut self, current_balance: f64) -> Self {
        self.current_balance = Some(current_balance);
        self
    }
}

/// Counters and totals reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_holders: usize,
    pub processed: usize,
    pub eligible: usize,
    pub ineligible: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_eligible_balance: f64,
    pub report_path: Option<PathBuf>,
}
