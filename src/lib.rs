//! # chain-p2p - the network layer of a small blockchain node
//!
//! Nodes talk over TCP with length-prefixed bincode frames. Each node keeps
//! a peer table, a pool of unconfirmed transactions and a per-peer block
//! sync queue; the ledger itself sits behind the traits in `core`.
//!
//! ## Layout
//! - `network/`: wire codec, transport, peer manager, mempool, sync, server
//! - `core/`: the ledger, block and transaction traits the network is written against
//! - `storage/`: a sled-backed ledger used by the binary
//! - `config/`: node settings from TOML and environment variables
//! - `utils/`: hashing, bincode helpers, periodic background tasks
//! - `cli/`: command-line interface for running and poking at nodes

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::NodeConfig;
pub use crate::core::{BlockRecord, Ledger, TransactionRecord};
pub use error::{NodeError, Result};
pub use network::{
    MempoolManager, Message, Node, NodeInfo, Nodes, Packet, PeerManager, PeerStatus, Server,
    SyncManager, TcpTransport, Transport,
};
pub use storage::{SledLedger, StoredBlock, StoredTransaction};
pub use utils::{current_timestamp, sha256_digest, PeriodicTask};
