// Sled-backed ledger used by the node binary.
// Blocks are opaque records keyed by hash; there is no consensus here, the
// tip is simply the tallest block seen.

use crate::core::{BlockRecord, Ledger, TransactionRecord};
use crate::error::{NodeError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::{error, info};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredTransaction {
    id: Vec<u8>,
    data: Vec<u8>,
}

impl StoredTransaction {
    /// Wrap an opaque payload; the id is the SHA-256 of the payload
    pub fn new(data: &[u8]) -> StoredTransaction {
        StoredTransaction {
            id: sha256_digest(data),
            data: data.to_vec(),
        }
    }

    pub fn get_id(&self) -> &[u8] {
        &self.id
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }
}

impl TransactionRecord for StoredTransaction {
    fn id(&self) -> Vec<u8> {
        self.id.clone()
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredBlock {
    timestamp: i64,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    transactions: Vec<StoredTransaction>,
    height: i32,
}

impl StoredBlock {
    pub fn new_block(
        pre_block_hash: &[u8],
        transactions: &[StoredTransaction],
        height: i32,
    ) -> Result<StoredBlock> {
        Ok(Self::assemble(
            current_timestamp()?,
            pre_block_hash,
            transactions,
            height,
        ))
    }

    /// Every node derives the same genesis block
    pub fn generate_genesis_block() -> StoredBlock {
        Self::assemble(0, &[], &[], 0)
    }

    fn assemble(
        timestamp: i64,
        pre_block_hash: &[u8],
        transactions: &[StoredTransaction],
        height: i32,
    ) -> StoredBlock {
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(pre_block_hash);
        preimage.extend_from_slice(&height.to_be_bytes());
        for tx in transactions {
            preimage.extend_from_slice(&tx.id);
        }

        StoredBlock {
            timestamp,
            pre_block_hash: pre_block_hash.to_vec(),
            hash: sha256_digest(&preimage),
            transactions: transactions.to_vec(),
            height,
        }
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        &self.pre_block_hash
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[StoredTransaction] {
        &self.transactions
    }
}

impl BlockRecord for StoredBlock {
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn transaction_ids(&self) -> Vec<Vec<u8>> {
        self.transactions.iter().map(|tx| tx.id.clone()).collect()
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}

pub struct SledLedger {
    db: Db,
    blocks: Tree,
    db_path: PathBuf,
    /// Serializes appends so the tip comparison and the write are atomic
    append_lock: Mutex<()>,
}

impl SledLedger {
    /// Open (or create) the ledger at `path`, writing the genesis block when empty
    pub fn open(path: &Path) -> Result<SledLedger> {
        let db = sled::open(path)
            .map_err(|e| NodeError::Ledger(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| NodeError::Ledger(format!("Failed to open blocks tree: {e}")))?;

        let ledger = SledLedger {
            db,
            blocks,
            db_path: path.to_path_buf(),
            append_lock: Mutex::new(()),
        };
        if ledger.tip_hash()?.is_none() {
            let genesis = StoredBlock::generate_genesis_block();
            info!("Creating genesis block {}", HEXLOWER.encode(&genesis.hash));
            ledger.add_block(genesis)?;
        }
        Ok(ledger)
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    fn tip_hash(&self) -> Result<Option<Vec<u8>>> {
        let tip = self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| NodeError::Ledger(format!("Failed to get tip hash: {e}")))?;
        Ok(tip.map(|hash| hash.to_vec()))
    }

    fn get_block(&self, hash: &[u8]) -> Result<Option<StoredBlock>> {
        let bytes = self
            .blocks
            .get(hash)
            .map_err(|e| NodeError::Ledger(format!("Failed to get block: {e}")))?;
        bytes
            .map(|bytes| <StoredBlock as BlockRecord>::deserialize(&bytes))
            .transpose()
    }

    /// Build a block on the current tip and store it
    pub fn append_block(&self, transactions: &[StoredTransaction]) -> Result<StoredBlock> {
        let tip = self
            .tip_hash()?
            .ok_or_else(|| NodeError::Ledger("Ledger has no tip".to_string()))?;
        let block = StoredBlock::new_block(&tip, transactions, self.best_height()? + 1)?;
        self.add_block(block.clone())?;
        Ok(block)
    }

    /// Stored blocks from the tip back along `pre_block_hash` links
    pub fn blocks(&self) -> Result<Vec<StoredBlock>> {
        let mut blocks = Vec::new();
        let mut current = self.tip_hash()?;
        while let Some(hash) = current {
            match self.get_block(&hash)? {
                Some(block) => {
                    current = (!block.pre_block_hash.is_empty()).then(|| block.pre_block_hash.clone());
                    blocks.push(block);
                }
                None => break,
            }
        }
        Ok(blocks)
    }
}

impl Ledger for SledLedger {
    type Block = StoredBlock;
    type Transaction = StoredTransaction;

    fn best_height(&self) -> Result<i32> {
        match self.tip_hash()? {
            Some(tip) => self
                .get_block(&tip)?
                .map(|block| block.height)
                .ok_or_else(|| NodeError::Ledger("Tip hash not found".to_string())),
            None => Ok(-1),
        }
    }

    fn block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.blocks()?.into_iter().map(|block| block.hash).collect())
    }

    fn block(&self, hash: &[u8]) -> Result<StoredBlock> {
        self.get_block(hash)?
            .ok_or_else(|| NodeError::BlockNotFound(HEXLOWER.encode(hash)))
    }

    fn add_block(&self, block: StoredBlock) -> Result<()> {
        let _guard = self.append_lock.lock().map_err(|e| {
            error!("Ledger append lock poisoned");
            NodeError::Lock(format!("ledger: {e}"))
        })?;

        if self.get_block(&block.hash)?.is_some() {
            return Ok(());
        }

        let becomes_tip = block.height > self.best_height()?;
        let block_data = <StoredBlock as BlockRecord>::serialize(&block)?;
        let block_hash = block.hash.as_slice();

        self.blocks
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                if becomes_tip {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                NodeError::Ledger(format!("Failed to add block: {e}"))
            })?;
        self.db
            .flush()
            .map_err(|e| NodeError::Ledger(format!("Failed to flush database: {e}")))?;
        Ok(())
    }
}
