//! The narrow view of the ledger that the network layer depends on.
//!
//! Storage, proof-of-work and transaction validation live behind these
//! traits; the network core only reads heights and hashes, fetches blocks by
//! hash and appends blocks it received.

use crate::error::Result;

/// A transaction as seen by the network: an id and its wire bytes
pub trait TransactionRecord: Clone + Send + Sync + 'static {
    /// Stable transaction id
    fn id(&self) -> Vec<u8>;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn deserialize(bytes: &[u8]) -> Result<Self>;
}

/// A block as seen by the network
pub trait BlockRecord: Send + Sync + 'static {
    fn hash(&self) -> Vec<u8>;

    fn height(&self) -> i32;

    /// Ids of the transactions this block confirms
    fn transaction_ids(&self) -> Vec<Vec<u8>>;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn deserialize(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

pub trait Ledger: Send + Sync + 'static {
    type Block: BlockRecord;
    type Transaction: TransactionRecord;

    /// Height of the local chain tip, -1 for an empty chain
    fn best_height(&self) -> Result<i32>;

    /// Every known block hash, tip first
    fn block_hashes(&self) -> Result<Vec<Vec<u8>>>;

    /// Fails with `NodeError::BlockNotFound` when the hash is unknown
    fn block(&self, hash: &[u8]) -> Result<Self::Block>;

    fn add_block(&self, block: Self::Block) -> Result<()>;
}
