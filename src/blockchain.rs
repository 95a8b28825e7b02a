// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// block hashing and the ledger pool (`chain`), integrity checks (`validation`)
// and derived summaries (`state`).

pub mod core;
pub use core::*;
