use crate::miner::{mine_block, MAX_DIFFICULTY};
use crate::transaction::{MiningRewardTx, Transaction, TransactionRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::state::ChainInfo;
use super::validation::{validate_chain, ChainIssue};

/// Leading zero hex characters required of every sealed block.
pub const SEAL_DIFFICULTY: u32 = 2;
pub const DEFAULT_MINING_REWARD: u64 = 10;
/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Recursively rebuild every JSON object with its keys in sorted order and
/// render the result compactly. Two values that differ only in key insertion
/// order render identically.
pub fn canonical_json(value: Value) -> String {
    fn sort_keys(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let sorted: Map<String, Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect();
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
            other => other,
        }
    }
    sort_keys(value).to_string()
}

/// SHA-256 of a string, lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<TransactionRecord>,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    pub fn new(
        index: u64,
        transactions: Vec<TransactionRecord>,
        timestamp: u64,
        previous_hash: String,
    ) -> Self {
        let mut block = Block {
            index,
            transactions,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn genesis() -> Self {
        Block::new(
            0,
            Vec::new(),
            chrono::Utc::now().timestamp_millis() as u64,
            GENESIS_PREVIOUS_HASH.to_string(),
        )
    }

    /// Digest over the canonical serialization of every field except `hash`.
    pub fn calculate_hash(&self) -> String {
        let body = serde_json::json!({
            "index": self.index,
            "transactions": self.transactions,
            "timestamp": self.timestamp,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        });
        sha256_hex(&canonical_json(body))
    }

    /// Proof-of-work: advance `nonce` until the hash starts with `difficulty` zeros.
    pub fn seal(&mut self, difficulty: u32) {
        mine_block(self, difficulty);
    }

    /// True when the stored hash matches a fresh recomputation.
    pub fn is_hash_consistent(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// Append-only sequence of sealed blocks plus the pending-transaction pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    pending: Vec<TransactionRecord>,
    difficulty: u32,
    mining_reward: u64,
}

impl Ledger {
    /// Create a ledger holding only the genesis block.
    pub fn new() -> Self {
        Self::with_params(SEAL_DIFFICULTY, DEFAULT_MINING_REWARD)
    }

    /// Difficulties above [`MAX_DIFFICULTY`] are clamped.
    pub fn with_params(difficulty: u32, mining_reward: u64) -> Self {
        if difficulty > MAX_DIFFICULTY {
            warn!(
                "Difficulty {} exceeds maximum {}, sealing at {}",
                difficulty, MAX_DIFFICULTY, MAX_DIFFICULTY
            );
        }
        let difficulty = difficulty.min(MAX_DIFFICULTY);
        Ledger {
            blocks: vec![Block::genesis()],
            pending: Vec::new(),
            difficulty,
            mining_reward,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest_block(&self) -> &Block {
        // The genesis block is created in every constructor and blocks are never removed.
        &self.blocks[self.blocks.len() - 1]
    }

    /// The most recent `limit` blocks, oldest first.
    pub fn recent_blocks(&self, limit: usize) -> &[Block] {
        let start = self.blocks.len().saturating_sub(limit);
        &self.blocks[start..]
    }

    pub fn pending_transactions(&self) -> &[TransactionRecord] {
        &self.pending
    }

    /// Queue a transaction, stamping it with its admission time.
    pub fn add_transaction(&mut self, tx: Transaction) {
        debug!("Queued {} transaction ({} pending)", tx.kind(), self.pending.len() + 1);
        self.pending.push(TransactionRecord::admit(tx));
    }

    /// Seal the pending pool (plus a reward transaction) into a new block.
    ///
    /// Returns `None` without touching the chain when the pool is empty.
    pub fn seal_pending(&mut self, reward_address: &str) -> Option<Block> {
        if self.pending.is_empty() {
            return None;
        }

        let mut transactions = std::mem::take(&mut self.pending);
        transactions.push(TransactionRecord::admit(Transaction::MiningReward(
            MiningRewardTx {
                recipient: reward_address.to_string(),
                amount: self.mining_reward,
            },
        )));

        let previous = self.latest_block();
        let mut timestamp = chrono::Utc::now().timestamp_millis() as u64;
        if timestamp <= previous.timestamp {
            timestamp = previous.timestamp + 1;
        }

        let mut block = Block::new(
            self.blocks.len() as u64,
            transactions,
            timestamp,
            previous.hash.clone(),
        );
        block.seal(self.difficulty);

        info!(
            "Sealed block #{} ({} transactions, nonce {}, hash {})",
            block.index,
            block.transactions.len(),
            block.nonce,
            block.hash
        );

        self.blocks.push(block.clone());
        Some(block)
    }

    /// Walk the chain and report the first integrity violation, if any.
    pub fn check(&self) -> Result<(), ChainIssue> {
        validate_chain(&self.blocks)
    }

    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    pub fn chain_info(&self) -> ChainInfo {
        ChainInfo::collect(&self.blocks, &self.pending)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
