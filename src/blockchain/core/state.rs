use crate::transaction::TransactionRecord;
use serde::Serialize;

use super::chain::Block;
use super::validation::validate_chain;

/// Snapshot summary of the ledger, derived on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainInfo {
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub chain_valid: bool,
    pub latest_block_hash: String,
}

impl ChainInfo {
    pub fn collect(blocks: &[Block], pending: &[TransactionRecord]) -> Self {
        ChainInfo {
            total_blocks: blocks.len(),
            total_transactions: blocks.iter().map(|b| b.transactions.len()).sum(),
            pending_transactions: pending.len(),
            chain_valid: validate_chain(blocks).is_ok(),
            latest_block_hash: blocks.last().map(|b| b.hash.clone()).unwrap_or_default(),
        }
    }
}
