//! Data storage and persistence
//!
//! A sled-backed implementation of the ledger traits, one database per node.

pub mod sled_ledger;

pub use sled_ledger::{SledLedger, StoredBlock, StoredTransaction};
