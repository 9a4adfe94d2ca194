//! Utility functions and helpers
//!
//! Hashing, timestamps, bincode helpers and the periodic background task
//! used by every manager.

pub mod crypto;
pub mod serialization;
pub mod task;

pub use crypto::{current_timestamp, sha256_digest};
pub use serialization::{deserialize, serialize};
pub use task::PeriodicTask;
