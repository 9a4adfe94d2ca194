use crate::config::NodeConfig;
use crate::core::TransactionRecord;
use crate::error::{NodeError, Result};
use crate::network::message::InvKind;
use crate::network::messenger::Messenger;
use crate::utils::PeriodicTask;
use data_encoding::HEXLOWER;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// A transaction waiting to be confirmed
#[derive(Debug, Clone)]
pub struct MempoolEntry<T> {
    pub transaction: T,
    pub admitted_at: Instant,
    pub fee: i64,
    pub size: usize,
    pub verified: bool,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolInfo {
    pub transaction_count: usize,
    pub total_size: usize,
    pub total_fees: i64,
    pub max_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MempoolSettings {
    pub max_size: usize,
    pub timeout: Duration,
    pub cleanup_interval: Duration,
    pub fee_per_byte: i64,
}

impl From<&NodeConfig> for MempoolSettings {
    fn from(config: &NodeConfig) -> Self {
        MempoolSettings {
            max_size: config.mempool_max_size,
            timeout: config.mempool_timeout(),
            cleanup_interval: config.mempool_cleanup_interval(),
            fee_per_byte: config.fee_per_byte,
        }
    }
}

impl Default for MempoolSettings {
    fn default() -> Self {
        MempoolSettings::from(&NodeConfig::default())
    }
}

/// ( K -> txid_hex, V => MempoolEntry )
struct Pool<T> {
    entries: HashMap<String, MempoolEntry<T>>,
    next_seq: u64,
}

impl<T> Pool<T> {
    fn oldest(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| (entry.admitted_at, entry.seq))
            .map(|(key, _)| key.clone())
    }
}

pub struct MempoolManager<T: TransactionRecord> {
    settings: MempoolSettings,
    messenger: Arc<Messenger>,
    pool: RwLock<Pool<T>>,
    cleanup: Mutex<Option<PeriodicTask>>,
}

impl<T: TransactionRecord> MempoolManager<T> {
    pub fn new(settings: MempoolSettings, messenger: Arc<Messenger>) -> MempoolManager<T> {
        MempoolManager {
            settings,
            messenger,
            pool: RwLock::new(Pool {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            cleanup: Mutex::new(None),
        }
    }

    fn pool_read(&self) -> Result<RwLockReadGuard<'_, Pool<T>>> {
        self.pool
            .read()
            .map_err(|e| NodeError::Lock(format!("mempool: {e}")))
    }

    fn pool_write(&self) -> Result<RwLockWriteGuard<'_, Pool<T>>> {
        self.pool
            .write()
            .map_err(|e| NodeError::Lock(format!("mempool: {e}")))
    }

    /// Admit a transaction and announce it to every known node.
    ///
    /// A full pool drops its oldest entry first.
    pub fn add_transaction(&self, transaction: T) -> Result<()> {
        let id = transaction.id();
        let key = HEXLOWER.encode(&id);
        let size = transaction.serialize()?.len();
        let fee = self.calculate_fee(size);

        {
            let mut pool = self.pool_write()?;
            if pool.entries.contains_key(&key) {
                return Err(NodeError::DuplicateTransaction(key));
            }

            if pool.entries.len() >= self.settings.max_size {
                if let Some(oldest) = pool.oldest() {
                    pool.entries.remove(&oldest);
                    info!("Evicted oldest transaction {oldest} from full mempool");
                }
            }

            let seq = pool.next_seq;
            pool.next_seq += 1;
            pool.entries.insert(
                key.clone(),
                MempoolEntry {
                    transaction,
                    admitted_at: Instant::now(),
                    fee,
                    size,
                    // structural checks only, see validate_transaction
                    verified: true,
                    seq,
                },
            );
        }

        info!("Added transaction {key} to mempool (fee: {fee}, size: {size})");

        let announcement = self.messenger.inv_packet(InvKind::Tx, &[id]);
        if let Err(e) = self.messenger.broadcast_packet(&announcement) {
            warn!("Failed to announce transaction {key}: {e}");
        }
        Ok(())
    }

    fn calculate_fee(&self, size: usize) -> i64 {
        i64::try_from(size)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.settings.fee_per_byte)
    }

    pub fn remove_transaction(&self, id: &[u8]) {
        let key = HEXLOWER.encode(id);
        match self.pool_write() {
            Ok(mut pool) => {
                if pool.entries.remove(&key).is_some() {
                    info!("Removed transaction {key} from mempool");
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    /// Strip the transactions of an accepted block. Unknown ids are ignored.
    pub fn remove_confirmed_transactions(&self, ids: &[Vec<u8>]) -> usize {
        let mut pool = match self.pool_write() {
            Ok(pool) => pool,
            Err(e) => {
                error!("{e}");
                return 0;
            }
        };
        let removed = ids
            .iter()
            .filter(|id| pool.entries.remove(&HEXLOWER.encode(id)).is_some())
            .count();
        if removed > 0 {
            info!("Removed {removed} confirmed transactions from mempool");
        }
        removed
    }

    pub fn get_transaction(&self, id: &[u8]) -> Option<T> {
        match self.pool_read() {
            Ok(pool) => pool
                .entries
                .get(&HEXLOWER.encode(id))
                .map(|entry| entry.transaction.clone()),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    pub fn get_entry(&self, id: &[u8]) -> Option<MempoolEntry<T>> {
        match self.pool_read() {
            Ok(pool) => pool.entries.get(&HEXLOWER.encode(id)).cloned(),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    pub fn has_transaction(&self, id: &[u8]) -> bool {
        match self.pool_read() {
            Ok(pool) => pool.entries.contains_key(&HEXLOWER.encode(id)),
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    /// Every pooled transaction in admission order
    pub fn get_all_transactions(&self) -> Vec<T> {
        let mut entries = self.entries();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.transaction).collect()
    }

    /// Highest fee first; equal fees keep admission order
    pub fn get_transactions_by_fees(&self, limit: usize) -> Vec<T> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.seq.cmp(&b.seq)));
        entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.transaction)
            .collect()
    }

    fn entries(&self) -> Vec<MempoolEntry<T>> {
        match self.pool_read() {
            Ok(pool) => pool.entries.values().cloned().collect(),
            Err(e) => {
                error!("{e}");
                Vec::new()
            }
        }
    }

    /// Drop every entry older than the pool timeout
    pub fn clean_expired_transactions(&self) -> usize {
        let mut pool = match self.pool_write() {
            Ok(pool) => pool,
            Err(e) => {
                error!("{e}");
                return 0;
            }
        };

        let timeout = self.settings.timeout;
        let before = pool.entries.len();
        pool.entries.retain(|key, entry| {
            let keep = entry.admitted_at.elapsed() <= timeout;
            if !keep {
                debug!("Transaction {key} expired");
            }
            keep
        });
        let expired = before - pool.entries.len();
        if expired > 0 {
            info!("Cleaned {expired} expired transactions from mempool");
        }
        expired
    }

    /// Structural checks only: a non-empty id and a non-empty encoding
    pub fn validate_transaction(&self, transaction: &T) -> Result<()> {
        if transaction.id().is_empty() {
            return Err(NodeError::InvalidTransaction(
                "transaction id is empty".to_string(),
            ));
        }
        if transaction.serialize()?.is_empty() {
            return Err(NodeError::InvalidTransaction(
                "transaction serializes to nothing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_mempool_info(&self) -> MempoolInfo {
        let (transaction_count, total_size, total_fees) = match self.pool_read() {
            Ok(pool) => pool.entries.values().fold(
                (0, 0, 0i64),
                |(count, size, fees), entry| {
                    (count + 1, size + entry.size, fees.saturating_add(entry.fee))
                },
            ),
            Err(e) => {
                error!("{e}");
                (0, 0, 0)
            }
        };
        MempoolInfo {
            transaction_count,
            total_size,
            total_fees,
            max_size: self.settings.max_size,
            timeout_secs: self.settings.timeout.as_secs(),
        }
    }

    pub fn size(&self) -> usize {
        self.pool_read().map(|pool| pool.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&self) {
        match self.pool_write() {
            Ok(mut pool) => {
                pool.entries.clear();
                info!("Mempool cleared");
            }
            Err(e) => error!("{e}"),
        }
    }

    /// Run expiry on the configured interval until `stop`
    pub fn start_cleanup_routine(self: &Arc<Self>) {
        let mut cleanup = match self.cleanup.lock() {
            Ok(cleanup) => cleanup,
            Err(e) => {
                error!("Failed to access mempool cleanup task: {e}");
                return;
            }
        };
        if cleanup.is_some() {
            return;
        }

        let manager = Arc::downgrade(self);
        *cleanup = Some(PeriodicTask::spawn(
            "mempool-cleanup",
            self.settings.cleanup_interval,
            move || {
                if let Some(manager) = manager.upgrade() {
                    manager.clean_expired_transactions();
                }
            },
        ));
    }

    pub fn stop(&self) {
        let task = match self.cleanup.lock() {
            Ok(mut cleanup) => cleanup.take(),
            Err(e) => {
                error!("Failed to access mempool cleanup task: {e}");
                None
            }
        };
        if let Some(mut task) = task {
            task.stop();
        }
    }
}
