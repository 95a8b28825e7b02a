//! ConsentChain - A tamper-evident ledger of patient consent for AI training data
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the pending pool, sealing and chain validation
//! - [`transaction`] - Transaction payloads recorded on the ledger
//! - [`miner`] - Proof-of-work nonce search
//!
//! ## Consent
//! - [`token`] - Per-patient consent tokens and their state machine
//! - [`registry`] - Token registry, patient index and audit log
//! - [`manager`] - Facade binding the registry to the ledger
//! - [`service`] - Shared handle for concurrent callers
//!
//! ## Ingestion
//! - [`import`] - Patient and consent table loading
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod miner;
pub mod transaction;

// ============================================================================
// Consent
// ============================================================================
pub mod manager;
pub mod registry;
pub mod service;
pub mod token;

// ============================================================================
// Ingestion
// ============================================================================
pub mod import;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ConsentError, Result};
pub use manager::ConsentManager;
pub use service::ConsentService;
