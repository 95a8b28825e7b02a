//! Shared, thread-safe handle over a [`ConsentManager`]
//!
//! Mutations (mint, consent update, sealing, bulk load) take the write lock so
//! they are linearized; queries take the read lock and run concurrently.

use crate::blockchain::Block;
use crate::config::Config;
use crate::import::PatientRecord;
use crate::manager::{ConsentManager, SystemStats, TokenInfo};
use crate::registry::AuditEntry;
use crate::token::{parse_expiry, ConsentMetadata, ConsentStatus};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Result of a consent query as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentCheck {
    pub valid: bool,
    pub reason: &'static str,
}

impl From<ConsentStatus> for ConsentCheck {
    fn from(status: ConsentStatus) -> Self {
        ConsentCheck {
            valid: status.is_valid(),
            reason: status.reason(),
        }
    }
}

#[derive(Clone)]
pub struct ConsentService {
    inner: Arc<RwLock<ConsentManager>>,
    chain_limit: usize,
}

impl ConsentService {
    pub fn new(manager: ConsentManager, chain_limit: usize) -> Self {
        ConsentService {
            inner: Arc::new(RwLock::new(manager)),
            chain_limit,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ConsentManager::with_config(config), config.view.chain_limit)
    }

    /// Mint a token with caller-supplied metadata; `None` if the patient already
    /// holds one or the metadata names a different patient.
    pub fn mint(
        &self,
        patient_id: &str,
        wallet_id: &str,
        metadata: ConsentMetadata,
    ) -> Option<String> {
        match self.inner.write().mint_token(patient_id, wallet_id, metadata) {
            Ok(token_id) => Some(token_id),
            Err(e) => {
                warn!("Mint rejected for patient {}: {}", patient_id, e);
                None
            }
        }
    }

    /// Mint a token from a source record (see [`ConsentManager::create_patient_nft`]).
    pub fn create_patient(&self, patient_id: &str, record: &PatientRecord) -> Option<String> {
        match self.inner.write().create_patient_nft(patient_id, record) {
            Ok(token_id) => Some(token_id),
            Err(e) => {
                warn!("Mint rejected for patient {}: {}", patient_id, e);
                None
            }
        }
    }

    /// Update a patient's consent. `expiry` is parsed leniently; an
    /// unparseable expiry or unknown patient returns `false` and changes nothing.
    pub fn update_consent(
        &self,
        patient_id: &str,
        allow_training: bool,
        expiry: Option<&str>,
        wallet_id: Option<&str>,
    ) -> bool {
        let expiry_date = match expiry.map(parse_expiry).transpose() {
            Ok(date) => date,
            Err(e) => {
                warn!("Rejected consent update for {}: {}", patient_id, e);
                return false;
            }
        };

        match self.inner.write().update_patient_consent(
            patient_id,
            allow_training,
            expiry_date,
            wallet_id,
        ) {
            Ok(_) => true,
            Err(e) => {
                warn!("Rejected consent update for {}: {}", patient_id, e);
                false
            }
        }
    }

    pub fn verify_consent(&self, patient_id: &str) -> ConsentCheck {
        match self.inner.read().verify_patient_consent(patient_id) {
            Ok(status) => status.into(),
            Err(_) => ConsentCheck {
                valid: false,
                reason: "not found",
            },
        }
    }

    pub fn patient_info(&self, patient_id: &str) -> Option<TokenInfo> {
        self.inner.read().get_patient_nft_info(patient_id)
    }

    /// The most recent `limit` blocks (default from configuration), oldest first.
    pub fn get_chain(&self, limit: Option<usize>) -> Vec<Block> {
        let limit = limit.unwrap_or(self.chain_limit);
        self.inner.read().ledger().recent_blocks(limit).to_vec()
    }

    pub fn is_chain_valid(&self) -> bool {
        self.inner.read().ledger().validate()
    }

    pub fn mine(&self) -> Option<Block> {
        self.inner.write().mine_transactions()
    }

    pub fn stats(&self) -> SystemStats {
        self.inner.read().get_system_stats()
    }

    pub fn export_audit_log(&self) -> Vec<AuditEntry> {
        self.inner.read().export_audit_log().to_vec()
    }

    pub fn import_csv(&self, patient_csv: &Path, consent_csv: &Path) -> usize {
        self.inner
            .write()
            .initialize_from_csv_data(patient_csv, consent_csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn service() -> ConsentService {
        let mut config = Config::default();
        config.ledger.difficulty = 1;
        config.view.chain_limit = 2;
        ConsentService::from_config(&config)
    }

    fn record(patient_id: &str, allow: bool) -> PatientRecord {
        match json!({ "patient_id": patient_id, "allow_training": allow }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_verify_unknown_patient() {
        let check = service().verify_consent("nobody");
        assert!(!check.valid);
        assert_eq!(check.reason, "not found");
    }

    #[test]
    fn test_update_with_bad_expiry_changes_nothing() {
        let service = service();
        service.create_patient("P1", &record("P1", false)).unwrap();
        let logs_before = service.export_audit_log().len();

        assert!(!service.update_consent("P1", true, Some("next tuesday"), None));
        assert_eq!(service.export_audit_log().len(), logs_before);
        assert_eq!(service.verify_consent("P1").reason, "not granted");

        assert!(service.update_consent("P1", true, Some("2999-01-01"), None));
        assert_eq!(service.verify_consent("P1"), ConsentCheck { valid: true, reason: "valid" });
        assert!(!service.update_consent("P404", true, None, None));
    }

    #[test]
    fn test_mint_with_metadata_rejects_second_token() {
        let service = service();
        let metadata = ConsentMetadata::new("P9", "hash", true, None);
        let token_id = service.mint("P9", "0xwallet", metadata.clone()).unwrap();
        assert!(service.mint("P9", "0xother", metadata).is_none());

        let info = service.patient_info("P9").unwrap();
        assert_eq!(info.token_id, token_id);
        assert_eq!(info.wallet_address, "0xwallet");
        assert!(service.verify_consent("P9").valid);
    }

    #[test]
    fn test_mint_rejects_metadata_naming_another_patient() {
        let service = service();
        let metadata = ConsentMetadata::new("P2", "hash", true, None);
        assert!(service.mint("P1", "0xw", metadata).is_none());
        assert!(service.patient_info("P1").is_none());
        assert!(service.export_audit_log().is_empty());
    }

    #[test]
    fn test_mine_terminates_with_unvalidated_difficulty() {
        let mut config = Config::default();
        config.ledger.difficulty = 65;
        let service = ConsentService::from_config(&config);

        let (tx, rx) = mpsc::channel();
        let worker = service.clone();
        thread::spawn(move || {
            let _ = tx.send(worker.mine());
        });
        let block = rx
            .recv_timeout(Duration::from_secs(60))
            .expect("sealing did not terminate")
            .expect("deployment was pending");
        assert_eq!(block.index, 1);
        assert!(service.is_chain_valid());
    }

    #[test]
    fn test_get_chain_respects_limit() {
        let service = service();
        for i in 0..3 {
            let id = format!("P{}", i);
            service.create_patient(&id, &record(&id, true)).unwrap();
            service.mine().unwrap();
        }
        let default_view = service.get_chain(None);
        assert_eq!(default_view.len(), 2);
        assert_eq!(default_view.last().unwrap().index, 3);
        assert_eq!(service.get_chain(Some(10)).len(), 4);
        assert!(service.is_chain_valid());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let service = service();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let service = service.clone();
                thread::spawn(move || {
                    for i in 0..5 {
                        let id = format!("T{}-{}", t, i);
                        service.create_patient(&id, &record(&id, true));
                        let _ = service.verify_consent(&id);
                        let _ = service.is_chain_valid();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        service.mine().unwrap();
        let stats = service.stats();
        assert_eq!(stats.consent.total_tokens, 20);
        assert_eq!(stats.consent.consented_count, 20);
        // deployment + 20 mints + reward
        assert_eq!(stats.blockchain.total_transactions, 22);
        assert!(service.is_chain_valid());
    }
}
