//! Consent manager: one ledger plus one registry behind a fixed contract address
//!
//! Every registry mutation queues a matching transaction on the ledger. Blocks
//! are sealed explicitly via [`ConsentManager::mine_transactions`] or in
//! batches during a bulk load.

use crate::blockchain::{canonical_json, sha256_hex, Block, ChainInfo, Ledger};
use crate::config::Config;
use crate::error::{ConsentError, Result};
use crate::import::{load_patient_tables, patient_id_of, PatientRecord};
use crate::registry::{AuditEntry, ConsentRegistry, ConsentStatistics};
use crate::token::{
    parse_expiry, ConsentMetadata, ConsentState, ConsentStatus, DEFAULT_HOSPITAL,
};
use crate::transaction::{ConsentUpdateTx, ContractDeploymentTx, MintTx, Transaction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{error, info, warn};

/// Hex characters kept from a digest when forming a `0x` address.
const ADDRESS_HEX_LEN: usize = 40;

/// `0x` + the first 40 hex characters of SHA-256(label).
pub fn contract_address_for(label: &str) -> String {
    format!("0x{}", &sha256_hex(label)[..ADDRESS_HEX_LEN])
}

/// Deterministic wallet address for a patient.
pub fn patient_wallet_address(patient_id: &str) -> String {
    format!(
        "0x{}",
        &sha256_hex(&format!("patient_{}", patient_id))[..ADDRESS_HEX_LEN]
    )
}

/// Content fingerprint of a source record, independent of column order.
pub fn record_fingerprint(record: &PatientRecord) -> String {
    sha256_hex(&canonical_json(Value::Object(record.clone())))
}

fn flag_from(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

fn expiry_from(value: Option<&Value>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_expiry(s).map(Some),
        Some(other) => Err(ConsentError::InvalidExpiry(other.to_string())),
    }
}

/// Token details for a patient, with validity resolved at query time.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub wallet_address: String,
    pub metadata: ConsentMetadata,
    pub consent_valid: bool,
    pub consent_reason: &'static str,
    pub consent_state: ConsentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub blockchain: ChainInfo,
    pub consent: ConsentStatistics,
    pub contract_address: String,
    pub system_status: &'static str,
}

#[derive(Debug, Clone)]
pub struct ConsentManager {
    ledger: Ledger,
    registry: ConsentRegistry,
    contract_address: String,
    reward_address: String,
    batch_size: usize,
}

impl ConsentManager {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Build the ledger and registry and queue the contract deployment.
    pub fn with_config(config: &Config) -> Self {
        let contract_address = contract_address_for(&config.contract.label);
        let mut ledger = Ledger::with_params(config.ledger.difficulty, config.ledger.mining_reward);
        ledger.add_transaction(Transaction::ContractDeployment(ContractDeploymentTx {
            contract_address: contract_address.clone(),
        }));
        info!("Deployed consent contract {}", contract_address);

        ConsentManager {
            ledger,
            registry: ConsentRegistry::new(contract_address.clone()),
            contract_address,
            reward_address: config.ledger.reward_address.clone(),
            batch_size: config.import.batch_size.max(1),
        }
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &ConsentRegistry {
        &self.registry
    }

    /// Mint a token with caller-supplied metadata and queue an `nft_mint` transaction.
    pub fn mint_token(
        &mut self,
        patient_id: &str,
        wallet_address: &str,
        metadata: ConsentMetadata,
    ) -> Result<String> {
        let token_id = self.registry.mint(patient_id, wallet_address, metadata)?;
        self.ledger.add_transaction(Transaction::NftMint(MintTx {
            contract_address: self.contract_address.clone(),
            patient_id: patient_id.to_string(),
            token_id: token_id.clone(),
            wallet_address: wallet_address.to_string(),
        }));
        Ok(token_id)
    }

    /// Mint a token for a patient from a source record.
    ///
    /// The record's `allow_training`, `expiry_date` and `hospital` columns seed
    /// the metadata; the whole record is fingerprinted into `data_hash`.
    pub fn create_patient_nft(&mut self, patient_id: &str, record: &PatientRecord) -> Result<String> {
        let expiry_date = expiry_from(record.get("expiry_date"))?;
        let allow_training = flag_from(record.get("allow_training"));
        let hospital = record
            .get("hospital")
            .and_then(Value::as_str)
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(DEFAULT_HOSPITAL);

        let metadata = ConsentMetadata::new(
            patient_id,
            record_fingerprint(record),
            allow_training,
            expiry_date,
        )
        .with_hospital(hospital);

        let wallet_address = patient_wallet_address(patient_id);
        self.mint_token(patient_id, &wallet_address, metadata)
    }

    /// Change a patient's consent, optionally rebinding the wallet, and queue a
    /// `consent_update` transaction. Returns the affected token id.
    pub fn update_patient_consent(
        &mut self,
        patient_id: &str,
        allow_training: bool,
        expiry_date: Option<DateTime<Utc>>,
        wallet_address: Option<&str>,
    ) -> Result<String> {
        let token_id = self
            .registry
            .get_token_by_patient(patient_id)
            .map(|token| token.token_id.clone())
            .ok_or_else(|| ConsentError::PatientNotFound(patient_id.to_string()))?;

        self.registry
            .update_consent(&token_id, allow_training, expiry_date)?;
        if let Some(wallet) = wallet_address {
            self.registry.update_wallet(&token_id, wallet)?;
        }

        self.ledger
            .add_transaction(Transaction::ConsentUpdate(ConsentUpdateTx {
                contract_address: self.contract_address.clone(),
                patient_id: patient_id.to_string(),
                token_id: token_id.clone(),
                allow_training,
                expiry_date,
                wallet_address: wallet_address.map(str::to_string),
            }));
        Ok(token_id)
    }

    pub fn verify_patient_consent(&self, patient_id: &str) -> Result<ConsentStatus> {
        self.registry.verify_consent(patient_id)
    }

    pub fn get_patient_nft_info(&self, patient_id: &str) -> Option<TokenInfo> {
        let token = self.registry.get_token_by_patient(patient_id)?;
        let now = Utc::now();
        let status = token.consent_status_at(now);
        Some(TokenInfo {
            token_id: token.token_id.clone(),
            wallet_address: token.wallet_address.clone(),
            metadata: token.metadata.clone(),
            consent_valid: status.is_valid(),
            consent_reason: status.reason(),
            consent_state: token.state_at(now),
            created_at: token.created_at,
            updated_at: token.updated_at,
        })
    }

    /// Seal pending transactions into a block; `None` if nothing was pending.
    pub fn mine_transactions(&mut self) -> Option<Block> {
        self.ledger.seal_pending(&self.reward_address)
    }

    pub fn get_system_stats(&self) -> SystemStats {
        SystemStats {
            blockchain: self.ledger.chain_info(),
            consent: self.registry.get_consent_statistics(),
            contract_address: self.contract_address.clone(),
            system_status: "operational",
        }
    }

    pub fn export_audit_log(&self) -> &[AuditEntry] {
        self.registry.consent_logs()
    }

    /// Mint one token per record, sealing a block after every `batch_size`
    /// mints and once more at the end. Records that cannot be minted are
    /// skipped with a warning. Returns the number of tokens minted.
    pub fn initialize_from_records<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = PatientRecord>,
    {
        let mut minted = 0usize;
        let mut skipped = 0usize;

        for record in records {
            let Some(patient_id) = patient_id_of(&record).map(str::to_string) else {
                warn!("Skipping record without patient_id");
                skipped += 1;
                continue;
            };
            match self.create_patient_nft(&patient_id, &record) {
                Ok(_) => {
                    minted += 1;
                    if minted % self.batch_size == 0 {
                        self.mine_transactions();
                    }
                }
                Err(e) => {
                    warn!("Skipping patient {}: {}", patient_id, e);
                    skipped += 1;
                }
            }
        }
        self.mine_transactions();

        info!(
            "Bulk load minted {} tokens ({} skipped), chain height {}",
            minted,
            skipped,
            self.ledger.len()
        );
        minted
    }

    pub fn try_initialize_from_csv_data(&mut self, patient_csv: &Path, consent_csv: &Path) -> Result<usize> {
        let records = load_patient_tables(patient_csv, consent_csv)?;
        Ok(self.initialize_from_records(records))
    }

    /// Bulk load from the patient and consent tables. A load failure is
    /// logged and reported as zero tokens created.
    pub fn initialize_from_csv_data(&mut self, patient_csv: &Path, consent_csv: &Path) -> usize {
        match self.try_initialize_from_csv_data(patient_csv, consent_csv) {
            Ok(count) => count,
            Err(e) => {
                error!("Error initializing from CSV: {}", e);
                0
            }
        }
    }
}

impl Default for ConsentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use chrono::Duration;
    use serde_json::json;

    fn record(patient_id: &str, allow: bool, expiry: Option<&str>) -> PatientRecord {
        let value = json!({
            "patient_id": patient_id,
            "age": 45,
            "hospital": "Metro General Hospital",
            "allow_training": allow,
            "expiry_date": expiry,
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn fast_manager() -> ConsentManager {
        let mut config = Config::default();
        config.ledger.difficulty = 1;
        ConsentManager::with_config(&config)
    }

    #[test]
    fn test_contract_address_is_deterministic() {
        let a = contract_address_for("PatientConsentContract");
        assert_eq!(a, contract_address_for("PatientConsentContract"));
        assert_eq!(a.len(), 42);
        assert!(a.starts_with("0x"));
        assert_eq!(ConsentManager::new().contract_address(), a);
    }

    #[test]
    fn test_wallet_and_fingerprint_are_deterministic() {
        assert_eq!(patient_wallet_address("P1"), patient_wallet_address("P1"));
        assert_ne!(patient_wallet_address("P1"), patient_wallet_address("P2"));

        let a = record("P1", true, None);
        let mut b = PatientRecord::new();
        for (k, v) in a.iter().rev() {
            b.insert(k.clone(), v.clone());
        }
        assert_eq!(record_fingerprint(&a), record_fingerprint(&b));
    }

    #[test]
    fn test_construction_queues_contract_deployment() {
        let manager = fast_manager();
        let pending = manager.ledger().pending_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.kind(), "contract_deployment");
    }

    #[test]
    fn test_create_patient_nft_queues_mint_without_sealing() {
        let mut manager = fast_manager();
        let source = record("P000001", true, Some("2999-12-31"));
        let token_id = manager.create_patient_nft("P000001", &source).unwrap();

        assert_eq!(manager.ledger().len(), 1);
        let last = manager.ledger().pending_transactions().last().unwrap();
        match &last.payload {
            Transaction::NftMint(tx) => {
                assert_eq!(tx.token_id, token_id);
                assert_eq!(tx.wallet_address, patient_wallet_address("P000001"));
                assert_eq!(tx.contract_address, manager.contract_address());
            }
            other => panic!("expected nft_mint, got {:?}", other),
        }

        let info = manager.get_patient_nft_info("P000001").unwrap();
        assert_eq!(info.metadata.data_hash, record_fingerprint(&source));
        assert_eq!(info.metadata.hospital, "Metro General Hospital");
        assert!(info.consent_valid);
        assert_eq!(info.consent_reason, "valid");
        assert_eq!(info.consent_state, ConsentState::Consented);
    }

    #[test]
    fn test_create_patient_nft_rejects_bad_expiry() {
        let mut manager = fast_manager();
        let err = manager
            .create_patient_nft("P1", &record("P1", true, Some("someday")))
            .unwrap_err();
        assert!(matches!(err, ConsentError::InvalidExpiry(_)));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_update_unknown_patient_queues_nothing() {
        let mut manager = fast_manager();
        let err = manager
            .update_patient_consent("ghost", true, None, None)
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(manager.ledger().pending_transactions().len(), 1);
    }

    #[test]
    fn test_update_queues_consent_transaction() {
        let mut manager = fast_manager();
        manager
            .create_patient_nft("P2", &record("P2", false, None))
            .unwrap();
        let expiry = Utc::now() - Duration::days(1);
        let token_id = manager
            .update_patient_consent("P2", true, Some(expiry), Some("0xnewwallet"))
            .unwrap();

        let last = manager.ledger().pending_transactions().last().unwrap();
        match &last.payload {
            Transaction::ConsentUpdate(tx) => {
                assert_eq!(tx.token_id, token_id);
                assert!(tx.allow_training);
                assert_eq!(tx.expiry_date, Some(expiry));
                assert_eq!(tx.wallet_address.as_deref(), Some("0xnewwallet"));
            }
            other => panic!("expected consent_update, got {:?}", other),
        }
        assert_eq!(
            manager.verify_patient_consent("P2").unwrap(),
            ConsentStatus::Expired
        );
        let info = manager.get_patient_nft_info("P2").unwrap();
        assert_eq!(info.wallet_address, "0xnewwallet");
        assert_eq!(info.token_id, token_id);
    }

    #[test]
    fn test_mine_transactions_seals_pool() {
        let mut manager = fast_manager();
        manager
            .create_patient_nft("P1", &record("P1", true, None))
            .unwrap();
        let block = manager.mine_transactions().unwrap();
        // deployment + mint + reward
        assert_eq!(block.transactions.len(), 3);
        assert!(manager.mine_transactions().is_none());
        assert!(manager.ledger().validate());
    }

    #[test]
    fn test_bulk_load_eleven_records_makes_three_blocks() {
        let mut manager = fast_manager();
        let records: Vec<_> = (1..=11)
            .map(|i| record(&format!("P{:06}", i), i % 2 == 0, None))
            .collect();
        let created = manager.initialize_from_records(records);

        assert_eq!(created, 11);
        assert_eq!(manager.ledger().len(), 3);
        assert!(manager.ledger().pending_transactions().is_empty());
        let blocks = manager.ledger().blocks();
        // deployment + 10 mints + reward
        assert_eq!(blocks[1].transactions.len(), 12);
        // 1 mint + reward
        assert_eq!(blocks[2].transactions.len(), 2);
        assert!(manager.ledger().validate());
    }

    #[test]
    fn test_bulk_load_skips_duplicates_and_missing_ids() {
        let mut manager = fast_manager();
        let mut anonymous = record("x", true, None);
        anonymous.remove("patient_id");
        let records = vec![
            record("P1", true, None),
            record("P1", false, None),
            anonymous,
            record("P2", false, None),
        ];
        assert_eq!(manager.initialize_from_records(records), 2);
        assert_eq!(manager.registry().len(), 2);
    }

    #[test]
    fn test_system_stats_combine_chain_and_consent() {
        let mut manager = fast_manager();
        manager
            .create_patient_nft("P1", &record("P1", true, None))
            .unwrap();
        manager.mine_transactions();

        let stats = manager.get_system_stats();
        assert_eq!(stats.system_status, "operational");
        assert_eq!(stats.contract_address, manager.contract_address());
        assert_eq!(stats.blockchain.total_blocks, 2);
        assert!(stats.blockchain.chain_valid);
        assert_eq!(stats.consent.total_tokens, 1);
        assert_eq!(stats.consent.consented_count, 1);
    }
}
