//! Incremental eligibility report.
//!
//! Rows are merged field by field as holders are processed and the whole
//! table is rewritten to CSV after every update. Flushes are serialized and
//! coalesced: a flush that finds the table unchanged since the last write
//! returns immediately, and one that starts after an update always sees it.

use crate::airdrop::types::{EligibilityRecord, RecordUpdate, SHARE_PENDING};
use crate::types::Pubkey;
use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Report column headers, in order.
pub const REPORT_COLUMNS: [&str; 10] = [
    "Status",
    "Wallet Address",
    "Current Balance",
    "Max Ever Held",
    "Airdrop Share %",
    "Holding Days",
    "First Acquired",
    "Ever Sold",
    "Status Reason",
    "Final Verdict",
];

/// Shared, cheaply cloneable report table.
#[derive(Clone)]
pub struct ReportAccumulator {
    inner: Arc<ReportInner>,
}

struct ReportInner {
    path: PathBuf,
    records: RwLock<HashMap<Pubkey, EligibilityRecord>>,
    /// Bumped on every mutation, under the `records` write lock
    version: AtomicU64,
    /// Version last written to disk; also the write lock
    written: Mutex<Option<u64>>,
    flushes: AtomicUsize,
    chunk_size: usize,
}

impl ReportAccumulator {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(ReportInner {
                path: path.into(),
                records: RwLock::new(HashMap::new()),
                version: AtomicU64::new(0),
                written: Mutex::new(None),
                flushes: AtomicUsize::new(0),
                chunk_size: chunk_size.max(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of CSV writes performed so far.
    pub fn flush_count(&self) -> usize {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.records.read().await.is_empty()
    }

    pub async fn get(&self, key: &str) -> Option<EligibilityRecord> {
        self.inner.records.read().await.get(key).cloned()
    }

    /// Rows in report order.
    pub async fn records(&self) -> Vec<EligibilityRecord> {
        sorted_rows(&*self.inner.records.read().await)
    }

    /// Merge `update` into the row for `key`, creating it if needed, and
    /// schedule a flush.
    pub async fn upsert(&self, key: &str, update: RecordUpdate) {
        {
            let mut records = self.inner.records.write().await;
            records
                .entry(key.to_string())
                .or_insert_with(|| EligibilityRecord::new(key.to_string()))
                .merge(update);
            self.inner.version.fetch_add(1, Ordering::SeqCst);
        }
        self.schedule_flush();
    }

    /// Set every eligible row's share of `total_eligible_balance`, in chunks,
    /// yielding to the scheduler between chunks. Returns the rows updated.
    pub async fn finalize_shares(&self, total_eligible_balance: f64) -> usize {
        let mut eligible: Vec<Pubkey> = {
            let records = self.inner.records.read().await;
            records
                .values()
                .filter(|record| record.is_eligible)
                .map(|record| record.owner.clone())
                .collect()
        };
        eligible.sort();

        let mut updated = 0;
        for chunk in eligible.chunks(self.inner.chunk_size) {
            {
                let mut records = self.inner.records.write().await;
                for key in chunk {
                    if let Some(record) = records.get_mut(key) {
                        record.airdrop_share_percent =
                            Some(format_share(record.current_balance, total_eligible_balance));
                        updated += 1;
                    }
                }
                self.inner.version.fetch_add(1, Ordering::SeqCst);
            }
            self.schedule_flush();
            tokio::task::yield_now().await;
        }

        info!(
            "Finalized shares for {} eligible holders (pool {})",
            updated, total_eligible_balance
        );
        updated
    }

    /// Write the table if it changed since the last write.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    fn schedule_flush(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.flush().await {
                warn!("Report write to {} failed: {}", inner.path.display(), e);
            }
        });
    }
}

impl ReportInner {
    async fn flush(&self) -> Result<()> {
        let requested = self.version.load(Ordering::SeqCst);
        let mut written = self.written.lock().await;
        if matches!(*written, Some(done) if done >= requested) {
            return Ok(());
        }

        let (rows, version) = {
            let records = self.records.read().await;
            (sorted_rows(&records), self.version.load(Ordering::SeqCst))
        };

        let bytes = render_csv(&rows)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        *written = Some(version);
        self.flushes.fetch_add(1, Ordering::SeqCst);
        debug!("Wrote {} report rows (version {})", rows.len(), version);
        Ok(())
    }
}

/// Percentage of the eligible pool, to 4 decimal places.
pub fn format_share(balance: f64, total_eligible_balance: f64) -> String {
    if total_eligible_balance <= 0.0 {
        return format!("{:.4}", 0.0);
    }
    format!("{:.4}", balance / total_eligible_balance * 100.0)
}

/// Largest balances first, ties broken by address.
fn sorted_rows(records: &HashMap<Pubkey, EligibilityRecord>) -> Vec<EligibilityRecord> {
    let mut rows: Vec<EligibilityRecord> = records.values().cloned().collect();
    rows.sort_by(|a, b| {
        b.current_balance
            .total_cmp(&a.current_balance)
            .then_with(|| a.owner.cmp(&b.owner))
    });
    rows
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn render_row(record: &EligibilityRecord) -> [String; 10] {
    let share = match &record.airdrop_share_percent {
        Some(share) => share.clone(),
        None if record.is_eligible => SHARE_PENDING.to_string(),
        None => format_share(0.0, 1.0),
    };

    [
        record.status.as_str().to_string(),
        record.owner.clone(),
        record.current_balance.to_string(),
        record.max_held.map(|v| v.to_string()).unwrap_or_default(),
        share,
        record.holding_days.map(|d| d.to_string()).unwrap_or_default(),
        record
            .first_acquired
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "Unknown".to_string()),
        record.has_sold.map(yes_no).unwrap_or_default().to_string(),
        record.reason.clone().unwrap_or_default(),
        yes_no(record.is_eligible).to_string(),
    ]
}

fn render_csv(rows: &[EligibilityRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(REPORT_COLUMNS)
        .context("Failed to write report header")?;
    for row in rows {
        writer
            .write_record(render_row(row))
            .with_context(|| format!("Failed to write report row for {}", row.owner))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to finish report: {}", e.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airdrop::types::{RecordStatus, WalletAnalysis};
    use crate::types::Holder;
    use chrono::{TimeZone, Utc};
    use futures::future::join_all;

    fn eligible(days: i64) -> WalletAnalysis {
        WalletAnalysis {
            is_eligible: true,
            first_acquired: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            max_held: 0.0,
            has_sold: false,
            holding_days: days,
            reason: "Meets all eligibility criteria".to_string(),
        }
    }

    async fn seed(report: &ReportAccumulator, owner: &str, amount: f64) {
        let holder = Holder { owner: owner.to_string(), amount };
        report.upsert(owner, RecordUpdate::from_holder(&holder)).await;
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn test_partial_updates_merge() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportAccumulator::new(dir.path().join("r.csv"), 10);

        seed(&report, "w1", 60.0).await;
        report.upsert("w1", RecordUpdate::from_analysis(&eligible(120))).await;

        let record = report.get("w1").await.unwrap();
        assert_eq!(record.current_balance, 60.0);
        assert_eq!(record.holding_days, Some(120));
        assert_eq!(record.status, RecordStatus::Eligible);
        assert!(record.airdrop_share_percent.is_none());
    }

    #[tokio::test]
    async fn test_finalize_shares_sum_to_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportAccumulator::new(dir.path().join("r.csv"), 2);

        let balances = [60.0, 25.0, 10.0, 5.0, 3.0];
        for (i, amount) in balances.iter().enumerate() {
            let owner = format!("w{}", i);
            seed(&report, &owner, *amount).await;
            report.upsert(&owner, RecordUpdate::from_analysis(&eligible(100))).await;
        }
        seed(&report, "loser", 1_000.0).await;

        let total: f64 = balances.iter().sum();
        assert_eq!(report.finalize_shares(total).await, balances.len());

        let shares: Vec<f64> = report
            .records()
            .await
            .iter()
            .filter(|r| r.is_eligible)
            .map(|r| r.airdrop_share_percent.as_ref().unwrap().parse::<f64>().unwrap())
            .collect();
        let sum: f64 = shares.iter().sum();
        assert!((sum - 100.0).abs() < 0.001, "shares summed to {}", sum);
        assert!(report.get("loser").await.unwrap().airdrop_share_percent.is_none());
    }

    #[tokio::test]
    async fn test_flush_writes_every_row_after_concurrent_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.csv");
        let report = ReportAccumulator::new(&path, 10);

        join_all((0..100).map(|i| {
            let report = report.clone();
            async move { seed(&report, &format!("wallet{:03}", i), i as f64).await }
        }))
        .await;
        report.flush().await.unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 100);
        assert_eq!(&rows[0][1], "wallet099");
        assert_eq!(&rows[0][0], "PENDING");
        assert_eq!(&rows[0][6], "Unknown");
    }

    #[tokio::test]
    async fn test_unchanged_table_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportAccumulator::new(dir.path().join("r.csv"), 10);

        seed(&report, "w1", 1.0).await;
        report.flush().await.unwrap();
        let after_first = report.flush_count();
        report.flush().await.unwrap();
        report.flush().await.unwrap();

        assert_eq!(report.flush_count(), after_first);
    }

    #[tokio::test]
    async fn test_row_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        let report = ReportAccumulator::new(&path, 10);

        seed(&report, "holder", 60_000_000.0).await;
        report.upsert("holder", RecordUpdate::from_analysis(&eligible(200))).await;
        seed(&report, "broken", 70_000_000.0).await;
        report.upsert("broken", RecordUpdate::from_failure(70_000_000.0)).await;
        report.flush().await.unwrap();

        let rows = read_rows(&path);
        assert_eq!(&rows[0][0], "ERROR");
        assert_eq!(&rows[0][4], "0.0000");
        assert_eq!(&rows[0][8], "Error during analysis");
        assert_eq!(&rows[1][0], "ELIGIBLE");
        assert_eq!(&rows[1][2], "60000000");
        assert_eq!(&rows[1][4], SHARE_PENDING);
        assert_eq!(&rows[1][6], "2026-01-01T00:00:00Z");
        assert_eq!(&rows[1][7], "No");
        assert_eq!(&rows[1][9], "Yes");
    }

    #[test]
    fn test_format_share() {
        assert_eq!(format_share(1.0, 3.0), "33.3333");
        assert_eq!(format_share(5.0, 0.0), "0.0000");
    }
}
