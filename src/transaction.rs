//! Ledger transaction payloads and the pending-pool record wrapper

pub mod types;

pub use types::*;
