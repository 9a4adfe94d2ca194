//! Core collaborator boundary
//!
//! The ledger, block and transaction abstractions the network layer is
//! written against.

pub mod ledger;

pub use ledger::{BlockRecord, Ledger, TransactionRecord};
