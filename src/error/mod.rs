//! Error handling for the network node
//!
//! Every fallible operation in the crate reports one of these variants.
//! Transport and decode errors are connection-scoped; none of them is
//! fatal to the process.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Error types for networking, mempool and sync operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Dial/accept/read/write failures
    Transport(String),
    /// Malformed or truncated frame
    Decode(String),
    /// Serialization errors outside of frame decoding
    Serialization(String),
    /// A well-formed frame carrying a command we do not handle
    UnknownCommand(String),
    /// Transaction already present in the mempool
    DuplicateTransaction(String),
    /// Transaction failed structural validation
    InvalidTransaction(String),
    /// Attempted to connect to our own address
    SelfConnection(String),
    /// Peer is already connected (or a connect is in flight)
    AlreadyConnected(String),
    /// Peer has been banned
    PeerBanned(String),
    /// Connected-peer table is full
    PeerLimitReached(usize),
    /// None of the bootstrap seeds accepted a connection
    NoBootstrapReachable,
    /// Requested block does not exist in the ledger
    BlockNotFound(String),
    /// Ledger collaborator failures
    Ledger(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// A poisoned lock
    Lock(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Transport(msg) => write!(f, "Transport error: {msg}"),
            NodeError::Decode(msg) => write!(f, "Decode error: {msg}"),
            NodeError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            NodeError::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
            NodeError::DuplicateTransaction(txid) => {
                write!(f, "Transaction {txid} already in mempool")
            }
            NodeError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            NodeError::SelfConnection(addr) => write!(f, "Cannot connect to self ({addr})"),
            NodeError::AlreadyConnected(addr) => write!(f, "Already connected to {addr}"),
            NodeError::PeerBanned(addr) => write!(f, "Peer {addr} is banned"),
            NodeError::PeerLimitReached(max) => write!(f, "Maximum peer limit reached ({max})"),
            NodeError::NoBootstrapReachable => {
                write!(f, "Failed to connect to any bootstrap nodes")
            }
            NodeError::BlockNotFound(hash) => write!(f, "Block not found: {hash}"),
            NodeError::Ledger(msg) => write!(f, "Ledger error: {msg}"),
            NodeError::Config(msg) => write!(f, "Configuration error: {msg}"),
            NodeError::Io(msg) => write!(f, "I/O error: {msg}"),
            NodeError::Lock(msg) => write!(f, "Lock poisoned: {msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

impl From<sled::Error> for NodeError {
    fn from(err: sled::Error) -> Self {
        NodeError::Ledger(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for NodeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for NodeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NodeError::Decode(err.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}
