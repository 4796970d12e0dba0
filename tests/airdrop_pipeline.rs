//! End-to-end runs against an in-memory chain

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diamond_hands::airdrop::chain::{ChainDataSource, SignaturePage};
use diamond_hands::{
    AirdropConfig, AirdropConfigBuilder, AirdropRun, BalanceChange, Holder, SignatureInfo,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MINT: &str = "Mint111";

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-10-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn change(wallet: &str, days_ago: i64, pre: f64, post: f64) -> BalanceChange {
    BalanceChange {
        signature: format!("{}-{}", wallet, days_ago),
        timestamp: now() - Duration::days(days_ago),
        pre_balance: Some(pre),
        post_balance: Some(post),
    }
}

fn holder(owner: &str, amount: f64) -> Holder {
    Holder {
        owner: owner.to_string(),
        amount,
    }
}

#[derive(Default)]
struct FakeChain {
    holders: Vec<Holder>,
    /// Newest first
    histories: HashMap<String, Vec<BalanceChange>>,
    failing_wallets: HashSet<String>,
    holder_failures_left: AtomicUsize,
    holder_calls: AtomicUsize,
    signature_calls: Mutex<HashMap<String, usize>>,
}

impl FakeChain {
    fn with_history(mut self, wallet: &str, amount: f64, history: Vec<BalanceChange>) -> Self {
        self.holders.push(holder(wallet, amount));
        self.histories.insert(wallet.to_string(), history);
        self
    }

    fn signature_calls(&self, wallet: &str) -> usize {
        self.signature_calls
            .lock()
            .unwrap()
            .get(wallet)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChainDataSource for FakeChain {
    async fn list_holders(&self, _mint: &str, _min_balance: f64) -> Result<Vec<Holder>> {
        self.holder_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.holder_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.holder_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("429 Too Many Requests"));
        }
        Ok(self.holders.clone())
    }

    async fn list_signatures(
        &self,
        wallet: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<SignaturePage> {
        *self
            .signature_calls
            .lock()
            .unwrap()
            .entry(wallet.to_string())
            .or_default() += 1;

        if self.failing_wallets.contains(wallet) {
            return Err(anyhow!("connection reset"));
        }

        let history = self.histories.get(wallet).cloned().unwrap_or_default();
        let start = match before {
            Some(cursor) => history
                .iter()
                .position(|c| c.signature == cursor)
                .map(|i| i + 1)
                .unwrap_or(history.len()),
            None => 0,
        };
        let signatures: Vec<SignatureInfo> = history
            .iter()
            .skip(start)
            .take(limit)
            .map(|c| SignatureInfo {
                signature: c.signature.clone(),
                block_time: c.timestamp,
            })
            .collect();

        Ok(SignaturePage {
            cursor: signatures.last().map(|s| s.signature.clone()),
            exhausted: signatures.len() < limit,
            signatures,
        })
    }

    async fn get_balance_change(
        &self,
        signature: &str,
        wallet: &str,
        _mint: &str,
    ) -> Result<Option<BalanceChange>> {
        Ok(self
            .histories
            .get(wallet)
            .and_then(|history| history.iter().find(|c| c.signature == signature))
            .cloned())
    }
}

fn config(root: &Path) -> AirdropConfig {
    AirdropConfigBuilder::new()
        .with_mint(MINT)
        .with_output_dir(root.join("output"))
        .with_cache_dir(root.join("cache"))
        .with_batching(2, 2)
        .with_retry(2, 1, 2)
        .with_cache_debounce(10)
        .with_detail_pacing(2, 0)
        .with_signature_page_size(2)
        .with_share_chunk_size(1)
        .build_config()
}

async fn run(config: AirdropConfig, chain: &Arc<FakeChain>) -> Result<diamond_hands::RunSummary> {
    let source: Arc<dyn ChainDataSource> = chain.clone();
    AirdropRun::new(config, source)?.with_now(now()).execute().await
}

/// Rows keyed by wallet address.
fn read_report(path: &Path) -> HashMap<String, csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap())
        .map(|r| (r[1].to_string(), r))
        .collect()
}

fn standard_chain() -> FakeChain {
    FakeChain::default()
        .with_history(
            "diamond",
            60_000_000.0,
            vec![change("diamond", 200, 0.0, 60_000_000.0)],
        )
        .with_history(
            "steady",
            140_000_000.0,
            vec![
                change("steady", 100, 100_000_000.0, 140_000_000.0),
                change("steady", 250, 40_000_000.0, 100_000_000.0),
                change("steady", 400, 0.0, 40_000_000.0),
            ],
        )
        .with_history(
            "paperhands",
            100_000_000.0,
            vec![
                change("paperhands", 10, 150_000_000.0, 100_000_000.0),
                change("paperhands", 300, 0.0, 150_000_000.0),
            ],
        )
        .with_history(
            "minnow",
            30_000_000.0,
            vec![change("minnow", 500, 0.0, 30_000_000.0)],
        )
        .with_history(
            "newcomer",
            80_000_000.0,
            vec![change("newcomer", 30, 0.0, 80_000_000.0)],
        )
}

#[tokio::test]
async fn test_full_run_classifies_every_holder() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(standard_chain());

    let summary = run(config(dir.path()), &chain).await.unwrap();

    assert_eq!(summary.total_holders, 5);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.ineligible, 3);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.total_eligible_balance, 200_000_000.0);

    let path = summary.report_path.unwrap();
    assert_eq!(path, dir.path().join("output").join("diamond_hands_Mint111.csv"));

    let rows = read_report(&path);
    assert_eq!(rows.len(), 5);

    let diamond = &rows["diamond"];
    assert_eq!(&diamond[0], "ELIGIBLE");
    assert_eq!(&diamond[4], "30.0000");
    assert_eq!(&diamond[5], "200");
    assert_eq!(&diamond[8], "Meets all eligibility criteria");
    assert_eq!(&diamond[9], "Yes");

    let steady = &rows["steady"];
    assert_eq!(&steady[4], "70.0000");
    assert_eq!(&steady[5], "400");

    let paperhands = &rows["paperhands"];
    assert_eq!(&paperhands[0], "INELIGIBLE");
    assert_eq!(&paperhands[7], "Yes");
    assert_eq!(&paperhands[8], "Has sold tokens");
    assert_eq!(&paperhands[4], "0.0000");
    assert_eq!(&paperhands[3], "150000000");

    assert_eq!(&rows["minnow"][8], "Balance below minimum (50,000,000)");
    assert_eq!(
        &rows["newcomer"][8],
        "Holding period too short (30 days, requires 90)"
    );

    let share_sum: f64 = rows
        .values()
        .filter(|r| &r[9] == "Yes")
        .map(|r| r[4].parse::<f64>().unwrap())
        .sum();
    assert!((share_sum - 100.0).abs() < 0.001);
}

#[tokio::test]
async fn test_failed_wallet_is_recorded_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = standard_chain().with_history("flaky", 70_000_000.0, vec![]);
    chain.failing_wallets.insert("flaky".to_string());
    let chain = Arc::new(chain);

    let summary = run(config(dir.path()), &chain).await.unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.eligible, 2);
    // Two attempts, then the wallet is given up on.
    assert_eq!(chain.signature_calls("flaky"), 2);

    let rows = read_report(&summary.report_path.unwrap());
    let flaky = &rows["flaky"];
    assert_eq!(&flaky[0], "ERROR");
    assert_eq!(&flaky[8], "Error during analysis");
    assert_eq!(&flaky[9], "No");
    assert_eq!(&rows["diamond"][4], "30.0000");
}

#[tokio::test]
async fn test_duplicate_owner_is_analyzed_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = FakeChain::default().with_history(
        "twice",
        60_000_000.0,
        vec![change("twice", 150, 0.0, 60_000_000.0)],
    );
    chain.holders.push(holder("twice", 60_000_000.0));
    let chain = Arc::new(chain);

    let summary = run(config(dir.path()), &chain).await.unwrap();

    assert_eq!(summary.total_holders, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.total_eligible_balance, 60_000_000.0);
    assert_eq!(chain.signature_calls("twice"), 1);

    let rows = read_report(&summary.report_path.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows["twice"][4], "100.0000");
}

#[tokio::test]
async fn test_paginated_history_finds_earliest_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(FakeChain::default().with_history(
        "patient",
        90_000_000.0,
        vec![
            change("patient", 20, 85_000_000.0, 90_000_000.0),
            change("patient", 40, 85_000_000.0, 85_000_000.0),
            change("patient", 60, 70_000_000.0, 85_000_000.0),
            change("patient", 80, 60_000_000.0, 70_000_000.0),
            change("patient", 120, 0.0, 60_000_000.0),
        ],
    ));

    let summary = run(config(dir.path()), &chain).await.unwrap();

    // Page size 2 over 5 signatures.
    assert_eq!(chain.signature_calls("patient"), 3);
    assert_eq!(summary.eligible, 1);

    let rows = read_report(&summary.report_path.unwrap());
    assert_eq!(&rows["patient"][5], "120");
    assert_eq!(&rows["patient"][3], "90000000");
}

#[tokio::test]
async fn test_transient_holder_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let chain = standard_chain();
    chain.holder_failures_left.store(1, Ordering::SeqCst);
    let chain = Arc::new(chain);

    let summary = run(config(dir.path()), &chain).await.unwrap();

    assert_eq!(chain.holder_calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.total_holders, 5);
}

#[tokio::test]
async fn test_unreachable_holder_list_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let chain = standard_chain();
    chain.holder_failures_left.store(10, Ordering::SeqCst);
    let chain = Arc::new(chain);

    let result = run(config(dir.path()), &chain).await;

    assert!(result.is_err());
    assert!(!dir
        .path()
        .join("output")
        .join("diamond_hands_Mint111.csv")
        .exists());
}

#[tokio::test]
async fn test_second_run_reuses_cached_analyses() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(standard_chain());

    let first = run(config(dir.path()), &chain).await.unwrap();
    let calls_after_first = chain.signature_calls("diamond");
    let second = run(config(dir.path()), &chain).await.unwrap();

    assert_eq!(calls_after_first, 1);
    assert_eq!(chain.signature_calls("diamond"), 1);
    // Holders are refetched every run.
    assert_eq!(chain.holder_calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.eligible, second.eligible);
    assert_eq!(first.total_eligible_balance, second.total_eligible_balance);
}

#[tokio::test]
async fn test_cached_holder_list_is_reused_only_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(standard_chain());
    run(config(dir.path()), &chain).await.unwrap();

    chain.holder_failures_left.store(10, Ordering::SeqCst);
    let mut reuse = config(dir.path());
    reuse.reuse_cached_holders = true;
    let summary = run(reuse, &chain).await.unwrap();

    assert_eq!(summary.total_holders, 5);
    assert!(run(config(dir.path()), &chain).await.is_err());
}

#[tokio::test]
async fn test_balance_change_between_runs_is_reevaluated() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(standard_chain());
    let first = run(config(dir.path()), &chain).await.unwrap();
    assert_eq!(first.eligible, 2);

    // Same history, but the holder now sits above the ceiling.
    let mut grown = standard_chain();
    for holder in grown.holders.iter_mut().filter(|h| h.owner == "diamond") {
        holder.amount = 2_000_000_000.0;
    }
    let grown = Arc::new(grown);
    let second = run(config(dir.path()), &grown).await.unwrap();

    assert_eq!(second.eligible, 1);
    assert_eq!(second.total_eligible_balance, 140_000_000.0);
    // The cached history is rescanned rather than refetched.
    assert_eq!(grown.signature_calls("diamond"), 0);

    let rows = read_report(&second.report_path.unwrap());
    let diamond = &rows["diamond"];
    assert_eq!(&diamond[0], "INELIGIBLE");
    assert_eq!(&diamond[2], "2000000000");
    assert_eq!(&diamond[8], "Balance above maximum (1,000,000,000)");
    assert_eq!(&rows["steady"][4], "100.0000");
}
