//! Chain synchronization.
//!
//! Sync is driven by the protocol exchange: a version handshake makes the
//! shorter side ask for block hashes, the inv answer opens a session for the
//! sending peer, and every received block pulls the next hash of that
//! session. Sessions are keyed by peer address, so concurrent syncs with
//! different peers never share a queue.

use crate::core::{BlockRecord, Ledger};
use crate::error::{NodeError, Result};
use crate::network::messenger::Messenger;
use crate::utils::PeriodicTask;
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// A chain advertised by another node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub node_addr: String,
    pub height: i32,
    pub hash: Vec<u8>,
}

impl ChainInfo {
    fn is_well_formed(&self) -> bool {
        self.height >= 0 && !self.hash.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub progress: f64,
    pub peers_connected: usize,
    pub blocks_remaining: usize,
    pub current_height: i32,
    pub target_height: i32,
}

pub struct SyncManager<L: Ledger> {
    ledger: Arc<L>,
    messenger: Arc<Messenger>,
    sync_interval: Duration,
    /// Blocks still to fetch, per peer
    sessions: RwLock<HashMap<String, VecDeque<Vec<u8>>>>,
    periodic: Mutex<Option<PeriodicTask>>,
}

impl<L: Ledger> SyncManager<L> {
    pub fn new(ledger: Arc<L>, messenger: Arc<Messenger>, sync_interval: Duration) -> Self {
        SyncManager {
            ledger,
            messenger,
            sync_interval,
            sessions: RwLock::new(HashMap::new()),
            periodic: Mutex::new(None),
        }
    }

    /// Announce our height to every known node; their replies drive the sync
    pub fn start_sync(&self) -> Result<Vec<JoinHandle<bool>>> {
        let height = self.ledger.best_height()?;
        info!("Starting blockchain synchronization at height {height}");

        let known = self.messenger.known_nodes().len();
        if known == 0 {
            info!("No known nodes to sync with");
            return Ok(Vec::new());
        }

        info!("Syncing with {known} known nodes");
        self.messenger
            .broadcast_packet(&self.messenger.version_packet(height))
    }

    /// Handshake a single node
    pub fn sync_with_node(&self, addr: &str) -> Result<()> {
        info!("Starting sync with node: {addr}");
        let height = self.ledger.best_height()?;
        self.messenger.send_version(addr, height)
    }

    /// Ask `node` for its block hashes to cover `from_height..=to_height`
    pub fn request_missing_blocks(&self, from_height: i32, to_height: i32, node: &str) -> Result<()> {
        info!("Requesting missing blocks {from_height}-{to_height} from {node}");
        self.messenger.send_get_blocks(node)
    }

    /// Drop stalled sessions and re-handshake every known node
    pub fn handle_sync_timeout(&self) -> usize {
        warn!("Sync timeout, retrying with known nodes");
        match self.sessions.write() {
            Ok(mut sessions) => sessions.clear(),
            Err(e) => error!("Failed to reset sync sessions: {e}"),
        }

        let mut reached = 0;
        for node in self.messenger.known_nodes().addresses() {
            match self.sync_with_node(&node) {
                Ok(()) => reached += 1,
                Err(e) => warn!("Failed to reconnect to {node}: {e}"),
            }
        }
        reached
    }

    /// Walk every stored block and check it carries a hash.
    ///
    /// Linkage, proof of work and transactions are not checked here.
    pub fn validate_chain(&self) -> Result<bool> {
        let hashes = self.ledger.block_hashes()?;
        if hashes.is_empty() {
            info!("No blocks to validate");
            return Ok(true);
        }

        info!("Validating {} blocks", hashes.len());
        for (index, hash) in hashes.iter().enumerate() {
            let block = match self.ledger.block(hash) {
                Ok(block) => block,
                Err(e) => {
                    error!("Failed to get block {index}: {e}");
                    return Ok(false);
                }
            };
            if block.hash().is_empty() {
                error!("Invalid block hash at index {index}");
                return Ok(false);
            }
        }

        info!("Blockchain validation completed successfully");
        Ok(true)
    }

    /// Pick the tallest well-formed candidate and, if it beats the local
    /// tip, ask its node for blocks. Returns the adopted chain.
    pub fn resolve_chain_conflicts(&self, candidates: &[ChainInfo]) -> Result<Option<ChainInfo>> {
        info!("Resolving chain conflicts among {} chains", candidates.len());

        let mut longest: Option<&ChainInfo> = None;
        for candidate in candidates.iter().filter(|c| c.is_well_formed()) {
            if longest.map_or(true, |best| candidate.height > best.height) {
                longest = Some(candidate);
            }
        }

        let Some(longest) = longest else {
            return Ok(None);
        };
        let local_height = self.ledger.best_height()?;
        if longest.height <= local_height {
            return Ok(None);
        }

        warn!(
            "Adopting chain from {} (height: {}) without validating its blocks",
            longest.node_addr, longest.height
        );
        self.messenger.send_get_blocks(&longest.node_addr)?;
        Ok(Some(longest.clone()))
    }

    /// Replace the session for `peer` with `hashes` and take the first one to fetch
    pub fn begin_session(&self, peer: &str, hashes: Vec<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| NodeError::Lock(format!("sync sessions: {e}")))?;

        let mut queue: VecDeque<Vec<u8>> = hashes.into();
        let first = queue.pop_front();
        if queue.is_empty() {
            sessions.remove(peer);
        } else {
            sessions.insert(peer.to_string(), queue);
        }
        Ok(first)
    }

    /// Next hash to fetch from `peer`, closing the session once it drains
    pub fn next_block(&self, peer: &str) -> Result<Option<Vec<u8>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| NodeError::Lock(format!("sync sessions: {e}")))?;

        let Some(queue) = sessions.get_mut(peer) else {
            return Ok(None);
        };
        let next = queue.pop_front();
        if queue.is_empty() {
            sessions.remove(peer);
            info!("Sync session with {peer} complete");
        }
        if let Some(hash) = &next {
            info!("Next block from {peer}: {}", HEXLOWER.encode(hash));
        }
        Ok(next)
    }

    /// Hashes still queued for `peer`
    pub fn session(&self, peer: &str) -> Vec<Vec<u8>> {
        match self.sessions.read() {
            Ok(sessions) => sessions
                .get(peer)
                .map(|queue| queue.iter().cloned().collect())
                .unwrap_or_default(),
            Err(e) => {
                error!("Failed to read sync sessions: {e}");
                Vec::new()
            }
        }
    }

    fn blocks_remaining(&self) -> usize {
        match self.sessions.read() {
            Ok(sessions) => sessions.values().map(VecDeque::len).sum(),
            Err(e) => {
                error!("Failed to read sync sessions: {e}");
                0
            }
        }
    }

    pub fn is_synced(&self) -> bool {
        self.blocks_remaining() == 0
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        let current_height = self.ledger.best_height().unwrap_or_else(|e| {
            error!("Failed to read best height: {e}");
            -1
        });
        let blocks_remaining = self.blocks_remaining();
        let queued = i32::try_from(blocks_remaining).unwrap_or(i32::MAX);

        SyncStatus {
            is_syncing: blocks_remaining > 0,
            progress: 1.0,
            peers_connected: self.messenger.known_nodes().len(),
            blocks_remaining,
            current_height,
            target_height: current_height.saturating_add(queued),
        }
    }

    /// Re-run `start_sync` on the sync interval while any node is known
    pub fn start_periodic_sync(self: &Arc<Self>) {
        let mut periodic = match self.periodic.lock() {
            Ok(periodic) => periodic,
            Err(e) => {
                error!("Failed to access periodic sync task: {e}");
                return;
            }
        };
        if periodic.is_some() {
            return;
        }

        let manager = Arc::downgrade(self);
        *periodic = Some(PeriodicTask::spawn(
            "periodic-sync",
            self.sync_interval,
            move || {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if manager.messenger.known_nodes().is_empty() {
                    return;
                }
                if let Err(e) = manager.start_sync() {
                    warn!("Periodic sync failed: {e}");
                }
            },
        ));
    }

    pub fn stop(&self) {
        let task = match self.periodic.lock() {
            Ok(mut periodic) => periodic.take(),
            Err(e) => {
                error!("Failed to access periodic sync task: {e}");
                None
            }
        };
        if let Some(mut task) = task {
            task.stop();
        }
    }
}
