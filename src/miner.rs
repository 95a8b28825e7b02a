//! Proof-of-work nonce search for sealing blocks
//!
//! SHA-256 output is effectively uniform over hex digits, so each attempt
//! succeeds with probability 16^-difficulty and the search terminates after
//! 16^difficulty attempts on average (256 at difficulty 2). Difficulty bounds
//! sealing latency only; it is not a security property of the ledger.

use crate::blockchain::Block;
use std::time::Instant;
use tracing::debug;

/// Highest difficulty a block is ever sealed at; larger requests are clamped.
pub const MAX_DIFFICULTY: u32 = 4;

/// True when the first `difficulty` hex characters of `hash` are all `'0'`.
pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Advance the block's nonce until its hash meets `difficulty`, clamped to
/// [`MAX_DIFFICULTY`].
///
/// Returns the number of hashes computed.
pub fn mine_block(block: &mut Block, difficulty: u32) -> u64 {
    let difficulty = difficulty.min(MAX_DIFFICULTY);
    let start = Instant::now();
    let mut attempts = 0u64;

    block.hash = block.calculate_hash();
    while !hash_meets_difficulty(&block.hash, difficulty) {
        block.nonce = block.nonce.wrapping_add(1);
        block.hash = block.calculate_hash();
        attempts += 1;
    }

    debug!(
        "Mined block #{} at difficulty {} after {} attempts in {:?}",
        block.index,
        difficulty,
        attempts,
        start.elapsed()
    );
    attempts
}
