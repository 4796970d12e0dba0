//! Chain data access: holder list, signature history and per-transaction
//! balance changes for the tracked token.
//!
//! `ChainDataSource` is the raw remote seam (one RPC round trip per call).
//! `ChainDataClient` layers retries, pagination, pacing and the on-disk cache
//! on top of it.

use crate::airdrop::cache::JsonFileCache;
use crate::airdrop::retry::RetryPolicy;
use crate::airdrop::types::AirdropConfig;
use crate::types::{BalanceChange, Holder, SignatureInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey as SolanaPubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{UiTransactionEncoding, UiTransactionTokenBalance};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// SPL Token program id.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Size of an SPL token account.
const TOKEN_ACCOUNT_LEN: u64 = 165;

/// One page of a wallet's signature history.
#[derive(Debug, Clone, Default)]
pub struct SignaturePage {
    /// Successful transactions with a known block time
    pub signatures: Vec<SignatureInfo>,
    /// Last signature of the raw page, used as the `before` cursor
    pub cursor: Option<String>,
    /// True when the node returned fewer entries than requested
    pub exhausted: bool,
}

/// Raw remote operations. Every call may fail transiently.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Current holders of `mint` with at least `min_balance` tokens.
    async fn list_holders(&self, mint: &str, min_balance: f64) -> Result<Vec<Holder>>;

    /// One page of signatures for `wallet`, newest first, older than `before`.
    async fn list_signatures(
        &self,
        wallet: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<SignaturePage>;

    /// Balance of `mint` held by `wallet` before and after `signature`.
    /// `None` when the transaction does not touch that balance.
    async fn get_balance_change(
        &self,
        signature: &str,
        wallet: &str,
        mint: &str,
    ) -> Result<Option<BalanceChange>>;
}

/// `ChainDataSource` over Solana JSON-RPC.
pub struct SolanaRpcSource {
    rpc: Arc<RpcClient>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl SolanaRpcSource {
    pub fn new(config: &AirdropConfig) -> Self {
        let rpc = Arc::new(RpcClient::new_with_timeout(
            config.rpc_url.clone(),
            Duration::from_secs(config.rpc_timeout_seconds),
        ));
        let quota = Quota::per_second(
            NonZeroU32::new(config.rpc_requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            rpc,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn throttle(&self) {
        self.rate_limiter.until_ready().await;
    }
}

#[async_trait]
impl ChainDataSource for SolanaRpcSource {
    #[instrument(skip(self))]
    async fn list_holders(&self, mint: &str, min_balance: f64) -> Result<Vec<Holder>> {
        let mint_pubkey = SolanaPubkey::from_str(mint).context("Failed to parse mint address")?;
        let token_program_id =
            SolanaPubkey::from_str(TOKEN_PROGRAM_ID).context("Failed to parse token program ID")?;

        self.throttle().await;
        let decimals = self
            .rpc
            .get_token_supply(&mint_pubkey)
            .await
            .context("Failed to fetch token supply")?
            .decimals;

        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(TOKEN_ACCOUNT_LEN),
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(0, mint_pubkey.to_bytes().to_vec())),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            },
            ..Default::default()
        };

        self.throttle().await;
        let accounts = self
            .rpc
            .get_program_accounts_with_config(&token_program_id, config)
            .await
            .context("Failed to fetch token accounts")?;
        debug!("Found {} token accounts", accounts.len());

        let mut holders: Vec<Holder> = accounts
            .iter()
            .filter_map(|(_, account)| parse_token_account(&account.data, decimals))
            .filter(|holder| holder.amount >= min_balance)
            .collect();
        holders.sort_by(|a, b| b.amount.total_cmp(&a.amount));

        Ok(holders)
    }

    #[instrument(skip(self))]
    async fn list_signatures(
        &self,
        wallet: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<SignaturePage> {
        let address = SolanaPubkey::from_str(wallet).context("Failed to parse wallet address")?;
        let before = before
            .map(Signature::from_str)
            .transpose()
            .context("Failed to parse pagination cursor")?;

        let config = GetConfirmedSignaturesForAddress2Config {
            before,
            until: None,
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
        };

        self.throttle().await;
        let raw = self
            .rpc
            .get_signatures_for_address_with_config(&address, config)
            .await
            .context("Failed to fetch signatures")?;

        let signatures = raw
            .iter()
            .filter(|status| status.err.is_none())
            .filter_map(|status| {
                let block_time = DateTime::<Utc>::from_timestamp(status.block_time?, 0)?;
                Some(SignatureInfo {
                    signature: status.signature.clone(),
                    block_time,
                })
            })
            .collect();

        Ok(SignaturePage {
            signatures,
            cursor: raw.last().map(|status| status.signature.clone()),
            exhausted: raw.len() < limit,
        })
    }

    #[instrument(skip(self, wallet, mint))]
    async fn get_balance_change(
        &self,
        signature: &str,
        wallet: &str,
        mint: &str,
    ) -> Result<Option<BalanceChange>> {
        let parsed = Signature::from_str(signature).context("Failed to parse signature")?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        self.throttle().await;
        let tx = self
            .rpc
            .get_transaction_with_config(&parsed, config)
            .await
            .with_context(|| format!("Failed to fetch transaction {}", signature))?;

        let Some(timestamp) = tx.block_time.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        else {
            return Ok(None);
        };
        let Some(meta) = tx.transaction.meta else {
            return Ok(None);
        };
        if meta.err.is_some() {
            return Ok(None);
        }

        let pre_balance = wallet_balance(token_entries(&meta.pre_token_balances), wallet, mint);
        let post_balance = wallet_balance(token_entries(&meta.post_token_balances), wallet, mint);
        if pre_balance.is_none() && post_balance.is_none() {
            return Ok(None);
        }

        Ok(Some(BalanceChange {
            signature: signature.to_string(),
            timestamp,
            pre_balance,
            post_balance,
        }))
    }
}

/// Flatten RPC token balances into `(owner, mint, ui_amount)` triples.
fn token_entries(
    balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
) -> Vec<(&str, &str, f64)> {
    let OptionSerializer::Some(balances) = balances else {
        return Vec::new();
    };

    balances
        .iter()
        .filter_map(|balance| {
            let OptionSerializer::Some(owner) = &balance.owner else {
                return None;
            };
            let amount = balance
                .ui_token_amount
                .ui_amount_string
                .parse::<f64>()
                .ok()
                .or(balance.ui_token_amount.ui_amount)?;
            Some((owner.as_str(), balance.mint.as_str(), amount))
        })
        .collect()
}

/// Sum of `mint` held by `wallet` across its token accounts, or `None` if
/// the wallet has no entry for that mint.
fn wallet_balance(entries: Vec<(&str, &str, f64)>, wallet: &str, mint: &str) -> Option<f64> {
    entries
        .into_iter()
        .filter(|(owner, entry_mint, _)| *owner == wallet && *entry_mint == mint)
        .map(|(_, _, amount)| amount)
        .reduce(|total, amount| total + amount)
}

/// Decode owner and balance from raw SPL token account data.
fn parse_token_account(data: &[u8], decimals: u8) -> Option<Holder> {
    if data.len() < 72 {
        return None;
    }

    let owner_bytes: [u8; 32] = data[32..64].try_into().ok()?;
    let amount_bytes: [u8; 8] = data[64..72].try_into().ok()?;
    let raw_amount = u64::from_le_bytes(amount_bytes);
    if raw_amount == 0 {
        return None;
    }

    Some(Holder {
        owner: SolanaPubkey::new_from_array(owner_bytes).to_string(),
        amount: raw_amount as f64 / 10f64.powi(decimals as i32),
    })
}

/// Retrying, caching front for a `ChainDataSource`.
#[derive(Clone)]
pub struct ChainDataClient {
    source: Arc<dyn ChainDataSource>,
    retry: RetryPolicy,
    cache: JsonFileCache,
    config: Arc<AirdropConfig>,
}

impl ChainDataClient {
    pub fn new(
        source: Arc<dyn ChainDataSource>,
        cache: JsonFileCache,
        config: Arc<AirdropConfig>,
    ) -> Self {
        Self {
            source,
            retry: RetryPolicy::from_config(&config),
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &JsonFileCache {
        &self.cache
    }

    fn holders_key(&self) -> String {
        format!("holders:{}", self.config.mint)
    }

    fn history_key(&self, wallet: &str) -> String {
        format!("history:{}:{}", self.config.mint, wallet)
    }

    /// Current holders at or above the configured floor.
    ///
    /// Always refetched unless `reuse_cached_holders` is set, since holder
    /// balances move between runs.
    #[instrument(skip(self), fields(mint = %self.config.mint))]
    pub async fn holders(&self) -> Result<Vec<Holder>> {
        let key = self.holders_key();

        if self.config.reuse_cached_holders {
            if let Some(cached) = self.cache.get::<Vec<Holder>>(&key).await? {
                warn!(
                    "Reusing {} cached holders; balances may be stale",
                    cached.len()
                );
                return Ok(cached);
            }
        }

        let mint = self.config.mint.as_str();
        let min_balance = self.config.min_tokens;
        let holders = self
            .retry
            .execute("list holders", || self.source.list_holders(mint, min_balance))
            .await
            .context("Failed to fetch holder list")?;

        info!("Fetched {} holders at or above {}", holders.len(), min_balance);
        self.cache.set(&key, &holders).await?;
        Ok(holders)
    }

    /// Every successful signature for `wallet`, newest first.
    #[instrument(skip(self))]
    pub async fn wallet_signatures(&self, wallet: &str) -> Result<Vec<SignatureInfo>> {
        let limit = self.config.signature_page_size.max(1);
        let mut cursor: Option<String> = None;
        let mut signatures = Vec::new();

        loop {
            let before = cursor.as_deref();
            let page = self
                .retry
                .execute("list signatures", || {
                    self.source.list_signatures(wallet, before, limit)
                })
                .await?;

            signatures.extend(page.signatures);
            if page.exhausted || page.cursor.is_none() || page.cursor == cursor {
                break;
            }
            cursor = page.cursor;
        }

        let mut seen = HashSet::new();
        signatures.retain(|info| seen.insert(info.signature.clone()));
        signatures.sort_by(|a, b| b.block_time.cmp(&a.block_time));
        debug!("Collected {} signatures", signatures.len());
        Ok(signatures)
    }

    /// Balance changes of the tracked token for `wallet`, newest first.
    /// Read through the cache.
    pub async fn wallet_history(&self, wallet: &str) -> Result<Vec<BalanceChange>> {
        let key = self.history_key(wallet);
        self.cache
            .get_or_fetch(&key, || self.fetch_wallet_history(wallet))
            .await
    }

    #[instrument(skip(self))]
    async fn fetch_wallet_history(&self, wallet: &str) -> Result<Vec<BalanceChange>> {
        let signatures = self.wallet_signatures(wallet).await?;
        let mint = self.config.mint.as_str();
        let batch_size = self.config.detail_batch_size.max(1);
        let pause = Duration::from_millis(self.config.detail_batch_delay_ms);

        let mut changes = Vec::new();
        for (index, batch) in signatures.chunks(batch_size).enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let details = join_all(batch.iter().map(|info| {
                self.retry.execute("get transaction", move || {
                    self.source.get_balance_change(&info.signature, wallet, mint)
                })
            }))
            .await;

            for detail in details {
                if let Some(change) = detail? {
                    changes.push(change);
                }
            }
        }

        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!(
            "{} of {} transactions touch the tracked balance",
            changes.len(),
            signatures.len()
        );
        Ok(changes)
    }
}
