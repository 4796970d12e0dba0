//! Wallet history analysis: reconstructs when a wallet first acquired the
//! token, the most it held and whether it ever sold, then applies the
//! eligibility rules.

use crate::airdrop::cache::JsonFileCache;
use crate::airdrop::chain::ChainDataClient;
use crate::airdrop::types::{AirdropConfig, AnalysisOutcome, WalletAnalysis};
use crate::types::BalanceChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const MS_PER_DAY: i64 = 86_400_000;

/// Accumulator for the history scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryScan {
    /// Earliest acquisition seen in the scanned window
    pub first_acquired: Option<DateTime<Utc>>,
    /// Largest of the current balance, every scanned post-balance and the
    /// balance held just before a sale
    pub max_held: f64,
    /// A balance decrease was seen; scanning stopped there
    pub has_sold: bool,
    /// Transactions consumed before the scan ended
    pub scanned: usize,
}

impl HistoryScan {
    fn start(current_balance: f64) -> Self {
        Self {
            first_acquired: None,
            max_held: current_balance,
            has_sold: false,
            scanned: 0,
        }
    }

    /// Fold one transaction in. Breaks on the first sale: the wallet is
    /// ineligible from then on, so older history cannot change the verdict.
    fn step(mut self, change: &BalanceChange) -> ControlFlow<Self, Self> {
        self.scanned += 1;
        self.max_held = self.max_held.max(change.post());

        if change.is_acquisition() {
            self.first_acquired = Some(match self.first_acquired {
                Some(earliest) if earliest <= change.timestamp => earliest,
                _ => change.timestamp,
            });
        } else if change.is_sale() {
            self.max_held = self.max_held.max(change.pre());
            self.has_sold = true;
            return ControlFlow::Break(self);
        }

        ControlFlow::Continue(self)
    }
}

/// Scan `changes` in the order given (newest first from the chain client).
///
/// `first_acquired` is a running minimum, so the result does not depend on
/// the traversal direction up to the first sale.
pub fn scan_history(changes: &[BalanceChange], current_balance: f64) -> HistoryScan {
    match changes
        .iter()
        .try_fold(HistoryScan::start(current_balance), HistoryScan::step)
    {
        ControlFlow::Continue(scan) | ControlFlow::Break(scan) => scan,
    }
}

/// Whole days between `first_acquired` and `now`, rounded down.
pub fn holding_days(first_acquired: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    first_acquired
        .map(|first| (now - first).num_milliseconds().div_euclid(MS_PER_DAY))
        .unwrap_or(0)
}

/// Apply the eligibility rules to a finished scan.
///
/// Exactly one reason is reported; checks run in this order: balance floor,
/// balance ceiling, sale, missing acquisition, holding period.
pub fn evaluate(
    scan: &HistoryScan,
    current_balance: f64,
    config: &AirdropConfig,
    now: DateTime<Utc>,
) -> WalletAnalysis {
    let days = holding_days(scan.first_acquired, now);
    let required = config.holding_days_required();

    let reason = if current_balance < config.min_tokens {
        format!("Balance below minimum ({})", format_amount(config.min_tokens))
    } else if current_balance > config.max_tokens {
        format!("Balance above maximum ({})", format_amount(config.max_tokens))
    } else if scan.has_sold {
        "Has sold tokens".to_string()
    } else if scan.first_acquired.is_none() {
        "No acquisition history found".to_string()
    } else if days < required {
        format!("Holding period too short ({} days, requires {})", days, required)
    } else {
        "Meets all eligibility criteria".to_string()
    };

    let is_eligible = current_balance >= config.min_tokens
        && current_balance <= config.max_tokens
        && scan.first_acquired.is_some()
        && !scan.has_sold
        && days >= required;

    WalletAnalysis {
        is_eligible,
        first_acquired: scan.first_acquired,
        max_held: scan.max_held,
        has_sold: scan.has_sold,
        holding_days: days,
        reason,
    }
}

/// Render a token amount with thousands separators, e.g. `50,000,000`.
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.4}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3 + 6);
    if amount < 0.0 {
        grouped.push('-');
    }
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let fraction = fraction.trim_end_matches('0');
    if !fraction.is_empty() {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

/// Wallets already handled during the current run.
#[derive(Debug, Clone, Default)]
pub struct ProcessedWallets {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ProcessedWallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `wallet` as taken. Returns false if it was already taken.
    pub async fn claim(&self, wallet: &str) -> bool {
        self.inner.lock().await.insert(wallet.to_string())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// A finished scan and the balance it was started from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScan {
    current_balance: f64,
    scan: HistoryScan,
}

/// Produces a `WalletAnalysis` per holder, reusing cached history scans.
#[derive(Clone)]
pub struct WalletHistoryAnalyzer {
    client: ChainDataClient,
    cache: JsonFileCache,
    config: Arc<AirdropConfig>,
}

impl WalletHistoryAnalyzer {
    pub fn new(client: ChainDataClient, config: Arc<AirdropConfig>) -> Self {
        let cache = client.cache().clone();
        Self {
            client,
            cache,
            config,
        }
    }

    fn scan_key(&self, wallet: &str) -> String {
        format!("scan:{}:{}", self.config.mint, wallet)
    }

    /// Analyze `wallet` once per run.
    ///
    /// The history scan is cached per wallet and reused while the balance
    /// is unchanged; the eligibility rules are always applied to the current
    /// balance and `now`. Fetch failures become `AnalysisOutcome::Failed` so
    /// one wallet cannot stop the batch.
    #[instrument(skip(self, processed, now))]
    pub async fn analyze(
        &self,
        wallet: &str,
        current_balance: f64,
        processed: &ProcessedWallets,
        now: DateTime<Utc>,
    ) -> AnalysisOutcome {
        if !processed.claim(wallet).await {
            debug!("Wallet already processed this run; skipping");
            return AnalysisOutcome::Skipped;
        }

        let key = self.scan_key(wallet);
        let cached = match self.cache.get::<CachedScan>(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Scan cache lookup failed: {}", e);
                None
            }
        };

        let scan = match cached {
            Some(cached) if cached.current_balance == current_balance => {
                debug!("Using cached history scan");
                cached.scan
            }
            _ => {
                let changes = match self.client.wallet_history(wallet).await {
                    Ok(changes) => changes,
                    Err(e) => return AnalysisOutcome::Failed(e),
                };
                let scan = scan_history(&changes, current_balance);
                debug!("Scanned {}/{} transactions", scan.scanned, changes.len());

                let entry = CachedScan {
                    current_balance,
                    scan,
                };
                if let Err(e) = self.cache.set(&key, &entry).await {
                    warn!("Failed to cache history scan: {}", e);
                }
                entry.scan
            }
        };

        let analysis = evaluate(&scan, current_balance, &self.config, now);
        debug!("eligible={} ({})", analysis.is_eligible, analysis.reason);
        AnalysisOutcome::Analyzed(analysis)
    }
}
