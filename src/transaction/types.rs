/// Transaction types for ConsentChain
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Payload of a ledger transaction, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    NftMint(MintTx),
    ConsentUpdate(ConsentUpdateTx),
    ContractDeployment(ContractDeploymentTx),
    MiningReward(MiningRewardTx),
}

impl Transaction {
    /// Wire name of the `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::NftMint(_) => "nft_mint",
            Transaction::ConsentUpdate(_) => "consent_update",
            Transaction::ContractDeployment(_) => "contract_deployment",
            Transaction::MiningReward(_) => "mining_reward",
        }
    }

    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Transaction::NftMint(tx) => Some(&tx.patient_id),
            Transaction::ConsentUpdate(tx) => Some(&tx.patient_id),
            _ => None,
        }
    }

    pub fn token_id(&self) -> Option<&str> {
        match self {
            Transaction::NftMint(tx) => Some(&tx.token_id),
            Transaction::ConsentUpdate(tx) => Some(&tx.token_id),
            _ => None,
        }
    }
}

/// A new consent token was minted for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintTx {
    pub contract_address: String,
    pub patient_id: String,
    pub token_id: String,
    pub wallet_address: String,
}

/// A patient's consent flag (and optionally expiry or wallet) changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentUpdateTx {
    pub contract_address: String,
    pub patient_id: String,
    pub token_id: String,
    pub allow_training: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDeploymentTx {
    pub contract_address: String,
}

/// Synthesized by the ledger when a block is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningRewardTx {
    pub recipient: String,
    pub amount: u64,
}

/// A transaction as admitted to the pending pool, stamped with its admission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(flatten)]
    pub payload: Transaction,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(payload: Transaction, timestamp: DateTime<Utc>) -> Self {
        TransactionRecord { payload, timestamp }
    }

    /// Stamp a payload with the current time.
    pub fn admit(payload: Transaction) -> Self {
        Self::new(payload, Utc::now())
    }

    /// SHA-256 over the canonical (key-sorted) JSON form.
    pub fn hash(&self) -> [u8; 32] {
        let value = serde_json::json!(self);
        let mut hasher = Sha256::new();
        hasher.update(crate::blockchain::canonical_json(value).as_bytes());
        hasher.finalize().into()
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }
}
