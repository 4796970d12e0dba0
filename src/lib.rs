//! diamond-hands - Solana token holder airdrop eligibility engine
//!
//! Classifies token holders by how long they have held without selling and
//! allocates an airdrop pool across the ones who qualify.

pub mod types;
pub mod airdrop;

// Re-export main types for convenience
pub use airdrop::{AirdropConfig, AirdropConfigBuilder, AirdropRun, RunSummary};
pub use types::{BalanceChange, Holder, SignatureInfo};
