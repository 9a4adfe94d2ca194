//! Test doubles for the network layer
//!
//! In-memory ledger records, a transport that records instead of dialing,
//! a scripted peer dialer, and helpers for sled-backed ledgers in temp dirs.

pub mod test_utils;

pub use test_utils::*;
