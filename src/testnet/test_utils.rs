//! Test utilities for network testing

use crate::core::{BlockRecord, Ledger, TransactionRecord};
use crate::error::{NodeError, Result};
use crate::network::message::{Message, Packet, PongPayload};
use crate::network::peer_manager::PeerDialer;
use crate::network::transport::Transport;
use crate::storage::SledLedger;
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct FakeTransaction {
    pub id: Vec<u8>,
    pub data: Vec<u8>,
}

impl FakeTransaction {
    pub fn new(id: &[u8], data: &[u8]) -> FakeTransaction {
        FakeTransaction {
            id: id.to_vec(),
            data: data.to_vec(),
        }
    }
}

impl TransactionRecord for FakeTransaction {
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
pub struct FakeBlock {
    pub hash: Vec<u8>,
    pub height: i32,
    pub transaction_ids: Vec<Vec<u8>>,
}

impl FakeBlock {
    pub fn new(hash: &[u8], height: i32) -> FakeBlock {
        FakeBlock {
            hash: hash.to_vec(),
            height,
            transaction_ids: vec![],
        }
    }

    pub fn with_transactions(mut self, ids: &[&[u8]]) -> FakeBlock {
        self.transaction_ids = ids.iter().map(|id| id.to_vec()).collect();
        self
    }
}

impl BlockRecord for FakeBlock {
    fn hash(&self) -> Vec<u8> {
        self.hash.clone()
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn transaction_ids(&self) -> Vec<Vec<u8>> {
        self.transaction_ids.clone()
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}

/// Ledger kept in a vector, oldest block first
#[derive(Default)]
pub struct MemoryLedger {
    blocks: RwLock<Vec<FakeBlock>>,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }

    /// A chain whose tip is at `height`, block hashes `b0`, `b1`, ...
    pub fn with_height(height: i32) -> MemoryLedger {
        let blocks = (0..=height)
            .map(|h| FakeBlock::new(format!("b{h}").as_bytes(), h))
            .collect();
        MemoryLedger {
            blocks: RwLock::new(blocks),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ledger for MemoryLedger {
    type Block = FakeBlock;
    type Transaction = FakeTransaction;

    fn best_height(&self) -> Result<i32> {
        Ok(self.blocks.read().unwrap().last().map_or(-1, |b| b.height))
    }

    fn block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .blocks
            .read()
            .unwrap()
            .iter()
            .rev()
            .map(|b| b.hash.clone())
            .collect())
    }

    fn block(&self, hash: &[u8]) -> Result<FakeBlock> {
        self.blocks
            .read()
            .unwrap()
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| NodeError::BlockNotFound(HEXLOWER.encode(hash)))
    }

    fn add_block(&self, block: FakeBlock) -> Result<()> {
        let mut blocks = self.blocks.write().unwrap();
        if !blocks.iter().any(|b| b.hash == block.hash) {
            blocks.push(block);
        }
        Ok(())
    }
}

/// Records every outbound message instead of opening sockets
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Message)>>,
    failing: Mutex<HashSet<String>>,
    answer_pings: Mutex<bool>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> RecordingTransport {
        RecordingTransport {
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            answer_pings: Mutex::new(true),
        }
    }

    /// Sends to `addr` fail from now on
    pub fn fail_address(&self, addr: &str) {
        self.failing.lock().unwrap().insert(addr.to_string());
    }

    pub fn set_answer_pings(&self, answer: bool) {
        *self.answer_pings.lock().unwrap() = answer;
    }

    pub fn sent_messages(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_packets(&self) -> Vec<(String, Packet)> {
        self.sent_messages()
            .into_iter()
            .map(|(addr, message)| (addr, Packet::from_message(&message).unwrap()))
            .collect()
    }

    pub fn sent_to(&self, addr: &str) -> Vec<Packet> {
        self.sent_packets()
            .into_iter()
            .filter(|(to, _)| to == addr)
            .map(|(_, packet)| packet)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, addr: &str, message: &Message) -> Result<()> {
        if self.failing.lock().unwrap().contains(addr) {
            return Err(NodeError::Transport(format!(
                "Failed to connect to {addr}: connection refused"
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((addr.to_string(), message.clone()));
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, addr: &str, message: &Message) -> Result<()> {
        self.record(addr, message)
    }

    fn request(&self, addr: &str, message: &Message) -> Result<Option<Message>> {
        self.record(addr, message)?;
        let is_ping = message.command == "ping";
        if is_ping && *self.answer_pings.lock().unwrap() {
            let pong = Packet::Pong(PongPayload {
                addr_from: addr.to_string(),
            });
            return Ok(Some(pong.to_message()?));
        }
        Ok(None)
    }
}

/// Peer dialer whose outcomes are set by the test
pub struct ScriptedDialer {
    failing: Mutex<HashSet<String>>,
    handshakes: Mutex<Vec<String>>,
    pings: Mutex<Vec<String>>,
    handshake_delay: Mutex<Duration>,
    ping_latency: Mutex<Option<Duration>>,
}

impl Default for ScriptedDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDialer {
    pub fn new() -> ScriptedDialer {
        ScriptedDialer {
            failing: Mutex::new(HashSet::new()),
            handshakes: Mutex::new(Vec::new()),
            pings: Mutex::new(Vec::new()),
            handshake_delay: Mutex::new(Duration::ZERO),
            ping_latency: Mutex::new(None),
        }
    }

    pub fn fail_address(&self, addr: &str) {
        self.failing.lock().unwrap().insert(addr.to_string());
    }

    pub fn heal_address(&self, addr: &str) {
        self.failing.lock().unwrap().remove(addr);
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.handshake_delay.lock().unwrap() = delay;
    }

    pub fn set_ping_latency(&self, latency: Option<Duration>) {
        *self.ping_latency.lock().unwrap() = latency;
    }

    /// Addresses handshaken so far, in call order
    pub fn handshakes(&self) -> Vec<String> {
        self.handshakes.lock().unwrap().clone()
    }

    pub fn pings(&self) -> Vec<String> {
        self.pings.lock().unwrap().clone()
    }

    fn check(&self, addr: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(addr) {
            return Err(NodeError::Transport(format!("{addr} unreachable")));
        }
        Ok(())
    }
}

impl PeerDialer for ScriptedDialer {
    fn handshake(&self, addr: &str) -> Result<()> {
        self.handshakes.lock().unwrap().push(addr.to_string());
        let delay = *self.handshake_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.check(addr)
    }

    fn ping(&self, addr: &str) -> Result<Option<Duration>> {
        self.pings.lock().unwrap().push(addr.to_string());
        self.check(addr)?;
        Ok(*self.ping_latency.lock().unwrap())
    }
}

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| NodeError::Io(e.to_string()))
}

/// Create a sled ledger holding only its genesis record
pub fn create_test_ledger() -> Result<(SledLedger, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let ledger = SledLedger::open(&temp_dir.path().join("test_ledger"))?;
    Ok((ledger, temp_dir))
}

/// Create several independent ledgers for multi-node tests
pub fn create_test_network(node_count: usize) -> Result<Vec<(SledLedger, TempDir)>> {
    (0..node_count).map(|_| create_test_ledger()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_ledger_orders_tip_first() {
        let ledger = MemoryLedger::with_height(2);
        assert_eq!(ledger.best_height().unwrap(), 2);
        assert_eq!(
            ledger.block_hashes().unwrap(),
            vec![b"b2".to_vec(), b"b1".to_vec(), b"b0".to_vec()]
        );
        assert!(matches!(
            ledger.block(b"missing"),
            Err(NodeError::BlockNotFound(_))
        ));
        assert_eq!(MemoryLedger::new().best_height().unwrap(), -1);
    }

    #[test]
    fn test_create_test_network() {
        let nodes = create_test_network(3).unwrap();
        assert_eq!(nodes.len(), 3);
        for (ledger, _dir) in nodes {
            assert_eq!(ledger.best_height().unwrap(), 0);
        }
    }

    #[test]
    fn test_recording_transport_answers_pings() {
        let transport = RecordingTransport::new();
        let ping = Message::new(crate::network::message::Command::Ping, vec![]);
        let reply = transport.request("peer:1", &ping).unwrap();
        assert!(reply.is_some());

        transport.fail_address("peer:1");
        assert!(transport.request("peer:1", &ping).is_err());
        assert_eq!(transport.sent_messages().len(), 1);
    }
}
