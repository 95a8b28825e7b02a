//! Consent token registry with a patient index and an append-only audit trail
//!
//! The registry owns every [`PatientToken`] keyed by token id, keeps a
//! `patient_id -> token_id` index consistent with that map on every mutation,
//! and records each consent-affecting action in `consent_logs`. Each patient
//! holds at most one token: minting a second one is rejected.

use crate::error::{ConsentError, Result};
use crate::token::{ConsentMetadata, ConsentStatus, PatientToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Mint,
    ConsentUpdate,
    WalletUpdate,
}

/// One consent-affecting action, as exported by the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub token_id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    /// Consent flag before the action; absent for mints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_consent: Option<bool>,
    pub new_consent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentStatistics {
    pub total_tokens: usize,
    pub consented_count: usize,
    pub expired_count: usize,
    /// `consented_count / total_tokens`, or 0 for an empty registry.
    pub consent_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ConsentRegistry {
    contract_address: String,
    tokens: HashMap<String, PatientToken>,
    /// Reverse index: patient_id -> token_id
    patient_index: HashMap<String, String>,
    consent_logs: Vec<AuditEntry>,
}

impl ConsentRegistry {
    pub fn new(contract_address: impl Into<String>) -> Self {
        ConsentRegistry {
            contract_address: contract_address.into(),
            tokens: HashMap::new(),
            patient_index: HashMap::new(),
            consent_logs: Vec::new(),
        }
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Create a token for a patient and log the mint.
    ///
    /// Fails with [`ConsentError::DuplicatePatient`] if the patient already holds
    /// one and with [`ConsentError::PatientMismatch`] if the metadata names a
    /// different patient. `extra` keys shadowing named metadata fields are dropped.
    pub fn mint(
        &mut self,
        patient_id: &str,
        wallet_address: &str,
        mut metadata: ConsentMetadata,
    ) -> Result<String> {
        if metadata.patient_id != patient_id {
            return Err(ConsentError::PatientMismatch {
                expected: patient_id.to_string(),
                found: metadata.patient_id,
            });
        }
        if self.patient_index.contains_key(patient_id) {
            return Err(ConsentError::DuplicatePatient(patient_id.to_string()));
        }
        let dropped = metadata.strip_reserved_extra();
        if !dropped.is_empty() {
            warn!(
                "Dropped reserved metadata keys {:?} for patient {}",
                dropped, patient_id
            );
        }

        let token = PatientToken::new(patient_id, wallet_address, metadata);
        let token_id = token.token_id.clone();

        self.consent_logs.push(AuditEntry {
            action: AuditAction::Mint,
            token_id: token_id.clone(),
            patient_id: patient_id.to_string(),
            wallet_address: Some(wallet_address.to_string()),
            old_consent: None,
            new_consent: token.metadata.allow_training,
            expiry_date: token.metadata.expiry_date,
            timestamp: token.created_at,
        });
        self.patient_index
            .insert(patient_id.to_string(), token_id.clone());
        self.tokens.insert(token_id.clone(), token);

        debug!("Minted token {} for patient {}", token_id, patient_id);
        Ok(token_id)
    }

    /// Apply a consent transition to a token and log old and new flags.
    pub fn update_consent(
        &mut self,
        token_id: &str,
        allow_training: bool,
        expiry_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let token = self
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| ConsentError::TokenNotFound(token_id.to_string()))?;

        let old_consent = token.metadata.allow_training;
        token.update_consent(allow_training, expiry_date);

        self.consent_logs.push(AuditEntry {
            action: AuditAction::ConsentUpdate,
            token_id: token_id.to_string(),
            patient_id: token.patient_id.clone(),
            wallet_address: None,
            old_consent: Some(old_consent),
            new_consent: allow_training,
            expiry_date,
            timestamp: token.updated_at,
        });

        info!(
            "Consent for patient {} changed {} -> {}",
            token.patient_id, old_consent, allow_training
        );
        Ok(())
    }

    /// Rebind the wallet that owns a token. The token id is unchanged.
    pub fn update_wallet(&mut self, token_id: &str, wallet_address: &str) -> Result<()> {
        let token = self
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| ConsentError::TokenNotFound(token_id.to_string()))?;

        if token.wallet_address == wallet_address {
            return Ok(());
        }
        token.wallet_address = wallet_address.to_string();
        token.updated_at = Utc::now();

        self.consent_logs.push(AuditEntry {
            action: AuditAction::WalletUpdate,
            token_id: token_id.to_string(),
            patient_id: token.patient_id.clone(),
            wallet_address: Some(wallet_address.to_string()),
            old_consent: Some(token.metadata.allow_training),
            new_consent: token.metadata.allow_training,
            expiry_date: None,
            timestamp: token.updated_at,
        });
        Ok(())
    }

    pub fn get_token(&self, token_id: &str) -> Option<&PatientToken> {
        self.tokens.get(token_id)
    }

    pub fn get_token_by_patient(&self, patient_id: &str) -> Option<&PatientToken> {
        self.patient_index
            .get(patient_id)
            .and_then(|token_id| self.tokens.get(token_id))
    }

    pub fn verify_consent(&self, patient_id: &str) -> Result<ConsentStatus> {
        self.verify_consent_at(patient_id, Utc::now())
    }

    pub fn verify_consent_at(&self, patient_id: &str, now: DateTime<Utc>) -> Result<ConsentStatus> {
        self.get_token_by_patient(patient_id)
            .map(|token| token.consent_status_at(now))
            .ok_or_else(|| ConsentError::PatientNotFound(patient_id.to_string()))
    }

    pub fn get_consent_statistics(&self) -> ConsentStatistics {
        self.get_consent_statistics_at(Utc::now())
    }

    pub fn get_consent_statistics_at(&self, now: DateTime<Utc>) -> ConsentStatistics {
        let mut consented_count = 0;
        let mut expired_count = 0;
        for token in self.tokens.values() {
            match token.consent_status_at(now) {
                ConsentStatus::Valid => consented_count += 1,
                ConsentStatus::Expired => expired_count += 1,
                ConsentStatus::NotGranted => {}
            }
        }

        let total_tokens = self.tokens.len();
        let consent_rate = if total_tokens > 0 {
            consented_count as f64 / total_tokens as f64
        } else {
            0.0
        };

        ConsentStatistics {
            total_tokens,
            consented_count,
            expired_count,
            consent_rate,
        }
    }

    pub fn consent_logs(&self) -> &[AuditEntry] {
        &self.consent_logs
    }

    pub fn tokens(&self) -> impl Iterator<Item = &PatientToken> {
        self.tokens.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metadata(patient_id: &str, allow: bool, expiry: Option<DateTime<Utc>>) -> ConsentMetadata {
        ConsentMetadata::new(patient_id, "00".repeat(32), allow, expiry)
    }

    fn registry() -> ConsentRegistry {
        ConsentRegistry::new("0xcontract")
    }

    #[test]
    fn test_mint_indexes_both_maps_and_logs() {
        let mut reg = registry();
        let token_id = reg.mint("P1", "0xw1", metadata("P1", false, None)).unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get_token(&token_id).unwrap().patient_id, "P1");
        assert_eq!(reg.get_token_by_patient("P1").unwrap().token_id, token_id);

        let logs = reg.consent_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AuditAction::Mint);
        assert_eq!(logs[0].wallet_address.as_deref(), Some("0xw1"));
        assert_eq!(logs[0].old_consent, None);
        assert!(!logs[0].new_consent);
    }

    #[test]
    fn test_second_mint_for_patient_is_rejected() {
        let mut reg = registry();
        let first = reg.mint("P1", "0xw1", metadata("P1", true, None)).unwrap();
        let err = reg
            .mint("P1", "0xw2", metadata("P1", false, None))
            .unwrap_err();

        assert!(matches!(err, ConsentError::DuplicatePatient(ref p) if p == "P1"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get_token_by_patient("P1").unwrap().token_id, first);
        assert_eq!(reg.consent_logs().len(), 1);
    }

    #[test]
    fn test_update_unknown_token_fails() {
        let mut reg = registry();
        let err = reg.update_consent("deadbeefdeadbeef", true, None).unwrap_err();
        assert!(err.is_not_found());
        assert!(reg.consent_logs().is_empty());
    }

    #[test]
    fn test_update_logs_old_and_new_flags() {
        let mut reg = registry();
        let token_id = reg.mint("P1", "0xw1", metadata("P1", false, None)).unwrap();
        let expiry = Utc::now() + Duration::days(30);
        reg.update_consent(&token_id, true, Some(expiry)).unwrap();

        let entry = reg.consent_logs().last().unwrap();
        assert_eq!(entry.action, AuditAction::ConsentUpdate);
        assert_eq!(entry.old_consent, Some(false));
        assert!(entry.new_consent);
        assert_eq!(entry.expiry_date, Some(expiry));
        assert_eq!(reg.verify_consent("P1").unwrap(), ConsentStatus::Valid);
    }

    #[test]
    fn test_verify_unknown_patient_is_not_found() {
        let reg = registry();
        assert!(matches!(
            reg.verify_consent("nobody"),
            Err(ConsentError::PatientNotFound(_))
        ));
    }

    #[test]
    fn test_mint_without_consent_verifies_not_granted() {
        let mut reg = registry();
        reg.mint("P1", "0xw1", metadata("P1", false, None)).unwrap();
        let status = reg.verify_consent("P1").unwrap();
        assert_eq!((status.is_valid(), status.reason()), (false, "not granted"));
    }

    #[test]
    fn test_statistics_classify_by_status() {
        let now = Utc::now();
        let mut reg = registry();
        reg.mint("P1", "0xw1", metadata("P1", true, None)).unwrap();
        reg.mint("P2", "0xw2", metadata("P2", true, Some(now + Duration::days(5))))
            .unwrap();
        reg.mint("P3", "0xw3", metadata("P3", true, Some(now - Duration::days(5))))
            .unwrap();

        let stats = reg.get_consent_statistics_at(now);
        assert_eq!(stats.total_tokens, 3);
        assert_eq!(stats.consented_count, 2);
        assert_eq!(stats.expired_count, 1);
        assert!((stats.consent_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_statistics_on_empty_registry() {
        let stats = registry().get_consent_statistics();
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.consent_rate, 0.0);
        assert!(!stats.consent_rate.is_nan());
    }

    #[test]
    fn test_wallet_rebind_keeps_token_id() {
        let mut reg = registry();
        let token_id = reg.mint("P1", "0xw1", metadata("P1", true, None)).unwrap();
        reg.update_wallet(&token_id, "0xw9").unwrap();
        reg.update_wallet(&token_id, "0xw9").unwrap();

        let token = reg.get_token_by_patient("P1").unwrap();
        assert_eq!(token.token_id, token_id);
        assert_eq!(token.wallet_address, "0xw9");
        // second rebind to the same wallet is not logged
        assert_eq!(reg.consent_logs().len(), 2);
        assert_eq!(reg.consent_logs()[1].action, AuditAction::WalletUpdate);
    }

    #[test]
    fn test_mint_rejects_metadata_for_another_patient() {
        let mut reg = registry();
        let err = reg
            .mint("P1", "0xw1", metadata("P2", true, None))
            .unwrap_err();
        match err {
            ConsentError::PatientMismatch { expected, found } => {
                assert_eq!(expected, "P1");
                assert_eq!(found, "P2");
            }
            other => panic!("expected patient mismatch, got {:?}", other),
        }
        assert!(reg.is_empty());
        assert!(reg.consent_logs().is_empty());
        assert!(reg.get_token_by_patient("P1").is_none());
    }

    #[test]
    fn test_mint_drops_reserved_extra_keys() {
        let mut reg = registry();
        let mut meta = metadata("P1", true, None);
        meta.extra
            .insert("allow_training".to_string(), serde_json::json!(false));
        let token_id = reg.mint("P1", "0xw1", meta).unwrap();

        let stored = &reg.get_token(&token_id).unwrap().metadata;
        assert!(stored.extra.is_empty());
        assert_eq!(
            reg.verify_consent("P1").unwrap(),
            ConsentStatus::Valid
        );
    }
}
