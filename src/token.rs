//! Per-patient consent tokens and the consent lifecycle
//!
//! A token's consent state is never stored; it is derived from
//! `allow_training`, `expiry_date` and whether consent was ever granted:
//!
//! ```text
//! Unconsented --grant--> Consented --time passes expiry--> Expired
//!      ^                     |                                |
//!      |                     +-----------revoke---------------+--> Revoked
//! ```
//!
//! The only transition is [`PatientToken::update_consent`]. A token with
//! `allow_training = true` and no expiry stays valid indefinitely.

use crate::blockchain::sha256_hex;
use crate::error::{ConsentError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Length of a token id in hex characters.
pub const TOKEN_ID_LEN: usize = 16;
pub const DEFAULT_HOSPITAL: &str = "Unknown";
pub const DEFAULT_CREATOR: &str = "system";

/// Field names of [`ConsentMetadata`]; never allowed in its `extra` map.
pub const RESERVED_METADATA_KEYS: [&str; 8] = [
    "patient_id",
    "data_hash",
    "allow_training",
    "consent_timestamp",
    "expiry_date",
    "hospital",
    "created_by",
    "ever_granted",
];

/// Result of a validity check at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Valid,
    NotGranted,
    Expired,
}

impl ConsentStatus {
    pub fn is_valid(self) -> bool {
        self == ConsentStatus::Valid
    }

    pub fn reason(self) -> &'static str {
        match self {
            ConsentStatus::Valid => "valid",
            ConsentStatus::NotGranted => "not granted",
            ConsentStatus::Expired => "expired",
        }
    }
}

/// Lifecycle state derived from a token's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Unconsented,
    Consented,
    Expired,
    Revoked,
}

/// Parse an expiry given as RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// (or space-separated) timestamp taken as UTC, or a bare `YYYY-MM-DD`
/// date meaning midnight UTC.
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = trimmed.trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(naive, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(ConsentError::InvalidExpiry(raw.to_string()))
}

/// Token id: SHA-256 over patient, wallet and creation instant, truncated.
pub fn derive_token_id(patient_id: &str, wallet_address: &str, created_at: DateTime<Utc>) -> String {
    let material = format!(
        "{}_{}_{}",
        patient_id,
        wallet_address,
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    sha256_hex(&material)[..TOKEN_ID_LEN].to_string()
}

/// Token metadata.
///
/// Required keys: `patient_id`, `data_hash`, `allow_training`,
/// `consent_timestamp`, `expiry_date` (nullable). Anything else the caller
/// supplies is kept under `extra` and serialized alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentMetadata {
    pub patient_id: String,
    pub data_hash: String,
    pub allow_training: bool,
    pub consent_timestamp: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default = "default_hospital")]
    pub hospital: String,
    #[serde(default = "default_creator")]
    pub created_by: String,
    /// Set once consent has been granted at any point; separates Revoked from Unconsented.
    #[serde(default)]
    pub ever_granted: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_hospital() -> String {
    DEFAULT_HOSPITAL.to_string()
}

fn default_creator() -> String {
    DEFAULT_CREATOR.to_string()
}

impl ConsentMetadata {
    pub fn new(
        patient_id: impl Into<String>,
        data_hash: impl Into<String>,
        allow_training: bool,
        expiry_date: Option<DateTime<Utc>>,
    ) -> Self {
        ConsentMetadata {
            patient_id: patient_id.into(),
            data_hash: data_hash.into(),
            allow_training,
            consent_timestamp: Utc::now(),
            expiry_date,
            hospital: default_hospital(),
            created_by: default_creator(),
            ever_granted: allow_training,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_hospital(mut self, hospital: impl Into<String>) -> Self {
        self.hospital = hospital.into();
        self
    }

    /// Drop `extra` entries that collide with a named field. Returns the dropped keys.
    pub fn strip_reserved_extra(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        for key in RESERVED_METADATA_KEYS {
            if self.extra.remove(key).is_some() {
                dropped.push(key.to_string());
            }
        }
        dropped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientToken {
    pub token_id: String,
    pub patient_id: String,
    pub wallet_address: String,
    pub metadata: ConsentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientToken {
    pub fn new(patient_id: &str, wallet_address: &str, metadata: ConsentMetadata) -> Self {
        Self::new_at(patient_id, wallet_address, metadata, Utc::now())
    }

    pub fn new_at(
        patient_id: &str,
        wallet_address: &str,
        mut metadata: ConsentMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        metadata.ever_granted |= metadata.allow_training;
        PatientToken {
            token_id: derive_token_id(patient_id, wallet_address, now),
            patient_id: patient_id.to_string(),
            wallet_address: wallet_address.to_string(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the consent flag. An absent `expiry_date` leaves any existing expiry in place.
    pub fn update_consent(&mut self, allow_training: bool, expiry_date: Option<DateTime<Utc>>) {
        self.update_consent_at(allow_training, expiry_date, Utc::now());
    }

    pub fn update_consent_at(
        &mut self,
        allow_training: bool,
        expiry_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.metadata.allow_training = allow_training;
        self.metadata.ever_granted |= allow_training;
        self.metadata.consent_timestamp = now;
        if let Some(expiry) = expiry_date {
            self.metadata.expiry_date = Some(expiry);
        }
        self.updated_at = now;
    }

    pub fn consent_status_at(&self, now: DateTime<Utc>) -> ConsentStatus {
        if !self.metadata.allow_training {
            return ConsentStatus::NotGranted;
        }
        match self.metadata.expiry_date {
            Some(expiry) if expiry <= now => ConsentStatus::Expired,
            _ => ConsentStatus::Valid,
        }
    }

    pub fn consent_status(&self) -> ConsentStatus {
        self.consent_status_at(Utc::now())
    }

    /// `(valid, reason)` as of now.
    pub fn is_consent_valid(&self) -> (bool, &'static str) {
        let status = self.consent_status();
        (status.is_valid(), status.reason())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> ConsentState {
        match self.consent_status_at(now) {
            ConsentStatus::Valid => ConsentState::Consented,
            ConsentStatus::Expired => ConsentState::Expired,
            ConsentStatus::NotGranted if self.metadata.ever_granted => ConsentState::Revoked,
            ConsentStatus::NotGranted => ConsentState::Unconsented,
        }
    }

    pub fn state(&self) -> ConsentState {
        self.state_at(Utc::now())
    }
}
