use super::chain::Block;
use std::fmt;
use tracing::warn;

/// First integrity violation found while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIssue {
    /// Stored hash disagrees with a recomputation over the block's fields.
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },
    /// `previous_hash` does not point at the prior block's hash.
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },
}

impl ChainIssue {
    pub fn index(&self) -> u64 {
        match self {
            ChainIssue::HashMismatch { index, .. } | ChainIssue::BrokenLink { index, .. } => {
                *index
            }
        }
    }
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainIssue::HashMismatch {
                index,
                stored,
                computed,
            } => write!(
                f,
                "block {} hash mismatch: stored {}, computed {}",
                index, stored, computed
            ),
            ChainIssue::BrokenLink {
                index,
                expected,
                found,
            } => write!(
                f,
                "block {} previous_hash mismatch: expected {}, found {}",
                index, expected, found
            ),
        }
    }
}

/// Walk the chain from position 1 and stop at the first violation.
///
/// The genesis block is trusted as-is; a genesis-only chain is valid.
pub fn validate_chain(blocks: &[Block]) -> Result<(), ChainIssue> {
    for pair in blocks.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        let computed = current.calculate_hash();
        if current.hash != computed {
            let issue = ChainIssue::HashMismatch {
                index: current.index,
                stored: current.hash.clone(),
                computed,
            };
            warn!("Chain validation failed: {}", issue);
            return Err(issue);
        }

        if current.previous_hash != previous.hash {
            let issue = ChainIssue::BrokenLink {
                index: current.index,
                expected: previous.hash.clone(),
                found: current.previous_hash.clone(),
            };
            warn!("Chain validation failed: {}", issue);
            return Err(issue);
        }
    }
    Ok(())
}
