//! Error types for ConsentChain

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("Token not found: {0}")]
    TokenNotFound(String),
    #[error("No token registered for patient: {0}")]
    PatientNotFound(String),
    #[error("Patient {0} already holds a consent token")]
    DuplicatePatient(String),
    #[error("Metadata names patient {found} but the token is for patient {expected}")]
    PatientMismatch { expected: String, found: String },
    #[error("Invalid expiry date: {0}")]
    InvalidExpiry(String),
    #[error("Load failure: {0}")]
    LoadFailure(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConsentError {
    /// True for the unknown token / unknown patient kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConsentError::TokenNotFound(_) | ConsentError::PatientNotFound(_)
        )
    }
}

impl From<toml::de::Error> for ConsentError {
    fn from(err: toml::de::Error) -> Self {
        ConsentError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ConsentError>;
