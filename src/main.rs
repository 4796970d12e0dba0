//! Command-line entry point for the diamond-hands eligibility check.

use anyhow::Result;
use clap::Parser;
use diamond_hands::{AirdropConfig, AirdropConfigBuilder, AirdropRun};
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser)]
#[command(
    name = "diamond-hands",
    version,
    about = "Find long-term token holders who never sold and compute their airdrop shares"
)]
struct Cli {
    /// Mint address of the tracked token
    #[arg(long, env = "TOKEN_MINT")]
    mint: String,

    /// Solana RPC URL
    #[arg(long, env = "RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    rpc_url: String,

    /// RPC request timeout in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECONDS", default_value = "60")]
    rpc_timeout: u64,

    /// Rate limit (requests per second)
    #[arg(long, env = "RPC_RATE_LIMIT", default_value = "10")]
    rate_limit: u32,

    /// Minimum balance to qualify
    #[arg(long, env = "MIN_TOKENS", default_value = "50000000")]
    min_tokens: f64,

    /// Maximum balance to qualify
    #[arg(long, env = "MAX_TOKENS", default_value = "1000000000")]
    max_tokens: f64,

    /// Required holding period in months (30 days each)
    #[arg(long, env = "MONTHS_REQUIRED", default_value = "3")]
    months: u32,

    /// Directory for the CSV report
    #[arg(long, env = "OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Directory for the cache file
    #[arg(long, env = "CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Holders per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "50")]
    batch_size: usize,

    /// Wallets analyzed concurrently
    #[arg(short, long, env = "CONCURRENCY", default_value = "5")]
    concurrency: usize,

    /// Attempts per RPC call
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "5")]
    retry_attempts: usize,

    /// First retry delay in milliseconds
    #[arg(long, env = "RETRY_MIN_DELAY_MS", default_value = "1000")]
    retry_min_delay: u64,

    /// Retry delay ceiling in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    retry_max_delay: u64,

    /// Quiet period before cache writes, in milliseconds
    #[arg(long, env = "CACHE_DEBOUNCE_MS", default_value = "5000")]
    cache_debounce: u64,

    /// Signatures requested per page
    #[arg(long, env = "SIGNATURE_PAGE_SIZE", default_value = "1000")]
    signature_page_size: usize,

    /// Transaction details fetched between pauses
    #[arg(long, env = "DETAIL_BATCH_SIZE", default_value = "10")]
    detail_batch_size: usize,

    /// Pause between transaction detail batches, in milliseconds
    #[arg(long, env = "DETAIL_BATCH_DELAY_MS", default_value = "200")]
    detail_batch_delay: u64,

    /// Report rows updated per share chunk
    #[arg(long, env = "SHARE_CHUNK_SIZE", default_value = "100")]
    share_chunk_size: usize,

    /// Log progress every N processed wallets
    #[arg(long, env = "PROGRESS_EVERY", default_value = "10")]
    progress_every: usize,

    /// Reuse the holder list from a previous run instead of refetching it
    #[arg(long)]
    reuse_cached_holders: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Map parsed flags onto a validated configuration.
fn build_config(cli: Cli) -> Result<AirdropConfig> {
    AirdropConfigBuilder::new()
        .with_mint(cli.mint)
        .with_rpc(cli.rpc_url, cli.rpc_timeout)
        .with_rate_limit(cli.rate_limit)
        .with_balance_range(cli.min_tokens, cli.max_tokens)
        .with_months_required(cli.months)
        .with_output_dir(cli.output_dir)
        .with_cache_dir(cli.cache_dir)
        .with_batching(cli.batch_size, cli.concurrency)
        .with_retry(cli.retry_attempts, cli.retry_min_delay, cli.retry_max_delay)
        .with_cache_debounce(cli.cache_debounce)
        .with_signature_page_size(cli.signature_page_size)
        .with_detail_pacing(cli.detail_batch_size, cli.detail_batch_delay)
        .with_share_chunk_size(cli.share_chunk_size)
        .with_progress_every(cli.progress_every)
        .with_reuse_cached_holders(cli.reuse_cached_holders)
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = build_config(cli)?;

    info!("Starting diamond-hands eligibility check for {}", config.mint);
    let summary = AirdropRun::with_rpc(config)?.execute().await?;

    println!("\nSummary");
    println!("  Holders:        {}", summary.total_holders);
    println!("  Processed:      {}", summary.processed);
    println!("  Eligible:       {}", summary.eligible);
    println!("  Ineligible:     {}", summary.ineligible);
    println!("  Skipped:        {}", summary.skipped);
    println!("  Errors:         {}", summary.errors);
    println!("  Eligible pool:  {}", summary.total_eligible_balance);
    if let Some(path) = &summary.report_path {
        println!("  Report:         {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_flags_reach_config() {
        let cli = Cli::try_parse_from([
            "diamond-hands",
            "--mint",
            "Mint111",
            "--cache-debounce",
            "250",
            "--signature-page-size",
            "200",
            "--detail-batch-size",
            "4",
            "--detail-batch-delay",
            "50",
            "--share-chunk-size",
            "25",
            "--progress-every",
            "3",
        ])
        .unwrap();
        let config = build_config(cli).unwrap();

        assert_eq!(config.mint, "Mint111");
        assert_eq!(config.cache_debounce_ms, 250);
        assert_eq!(config.signature_page_size, 200);
        assert_eq!(config.detail_batch_size, 4);
        assert_eq!(config.detail_batch_delay_ms, 50);
        assert_eq!(config.share_chunk_size, 25);
        assert_eq!(config.progress_every, 3);
        assert_eq!(config.batch_size, 50);
    }
}
