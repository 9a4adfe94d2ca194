use crate::config::NodeConfig;
use crate::core::{BlockRecord, Ledger, TransactionRecord};
use crate::error::{NodeError, Result};
use crate::network::mempool::{MempoolInfo, MempoolManager, MempoolSettings};
use crate::network::message::{
    read_message, write_message, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind,
    InvPayload, Message, Packet, PingPayload, TxPayload, VersionPayload,
};
use crate::network::messenger::Messenger;
use crate::network::node::Nodes;
use crate::network::peer_manager::{
    same_endpoint, NetworkInfo, PeerDialer, PeerManager, PeerSettings,
};
use crate::network::sync::{SyncManager, SyncStatus};
use crate::network::transport::{TcpTransport, Transport};
use data_encoding::HEXLOWER;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io::Write;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Inbound connections idle for this long are closed
const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Announces this node with a version message and measures ping round-trips
pub struct HandshakeDialer<L: Ledger> {
    messenger: Arc<Messenger>,
    ledger: Arc<L>,
}

impl<L: Ledger> HandshakeDialer<L> {
    pub fn new(messenger: Arc<Messenger>, ledger: Arc<L>) -> Self {
        HandshakeDialer { messenger, ledger }
    }
}

impl<L: Ledger> PeerDialer for HandshakeDialer<L> {
    /// Sends our version; no acknowledgment is awaited
    fn handshake(&self, addr: &str) -> Result<()> {
        let best_height = self.ledger.best_height()?;
        self.messenger.send_version(addr, best_height)?;
        self.messenger.known_nodes().add_node(addr);
        Ok(())
    }

    fn ping(&self, addr: &str) -> Result<Option<Duration>> {
        let started = Instant::now();
        match self.messenger.ping(addr)? {
            Some(Packet::Pong(_)) => Ok(Some(started.elapsed())),
            Some(other) => {
                debug!("Expected pong from {addr}, got {}", other.command());
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub address: String,
    pub node_id: String,
    pub is_running: bool,
    pub height: i32,
    pub network: NetworkInfo,
    pub mempool: MempoolInfo,
    pub sync_status: SyncStatus,
}

/// P2P server: owns the listener and the known-node set, and wires the
/// peer, mempool and sync managers to the protocol handlers.
pub struct Server<L: Ledger> {
    address: String,
    node_id: String,
    ledger: Arc<L>,
    messenger: Arc<Messenger>,
    peers: Arc<PeerManager>,
    mempool: Arc<MempoolManager<L::Transaction>>,
    sync: Arc<SyncManager<L>>,
    running: AtomicBool,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl<L: Ledger> Server<L> {
    pub fn new(config: &NodeConfig, ledger: Arc<L>) -> Result<Self> {
        let transport = TcpTransport::new(config.connect_timeout(), config.io_timeout());
        Self::with_transport(config, ledger, Arc::new(transport))
    }

    pub fn with_transport(
        config: &NodeConfig,
        ledger: Arc<L>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let address = config.node_address.clone();
        let known_nodes = Arc::new(Nodes::new());
        let messenger = Arc::new(Messenger::new(
            &address,
            config.protocol_version,
            transport,
            known_nodes,
        ));

        let dialer = Arc::new(HandshakeDialer::new(
            Arc::clone(&messenger),
            Arc::clone(&ledger),
        ));
        let peers = Arc::new(PeerManager::new(
            &address,
            PeerSettings::from(config),
            config.bootstrap_nodes.clone(),
            dialer,
        ));
        let mempool = Arc::new(MempoolManager::new(
            MempoolSettings::from(config),
            Arc::clone(&messenger),
        ));
        let sync = Arc::new(SyncManager::new(
            Arc::clone(&ledger),
            Arc::clone(&messenger),
            config.sync_interval(),
        ));

        Ok(Server {
            address,
            node_id: config.node_id(),
            ledger,
            messenger,
            peers,
            mempool,
            sync,
            running: AtomicBool::new(false),
            listen_addr: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    pub fn mempool(&self) -> &Arc<MempoolManager<L::Transaction>> {
        &self.mempool
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager<L>> {
        &self.sync
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until `stop`
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.address).map_err(|e| {
            NodeError::Transport(format!("Failed to bind to {}: {e}", self.address))
        })?;
        self.serve(listener)
    }

    /// Serve on an already bound listener until `stop`
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::Transport(format!("Failed to read listener address: {e}")))?;
        match self.listen_addr.lock() {
            Ok(mut addr) => *addr = Some(local_addr),
            Err(e) => error!("Failed to record listener address: {e}"),
        }

        self.running.store(true, Ordering::SeqCst);
        self.peers.start();
        self.mempool.start_cleanup_routine();
        self.sync.start_periodic_sync();
        info!("Node {} listening on {local_addr}", self.node_id);

        for stream in listener.incoming() {
            if !self.is_running() {
                break;
            }
            match stream {
                Ok(stream) => {
                    let server = Arc::clone(self);
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(e) => error!("Error accepting connection: {e}"),
            }
        }

        info!("Node {} stopped accepting connections", self.node_id);
        Ok(())
    }

    /// Stop background tasks and wake the accept loop so the listener closes.
    /// Connections already being handled run to completion.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.peers.stop();
        self.mempool.stop();
        self.sync.stop();

        if !was_running {
            return;
        }
        let listen_addr = match self.listen_addr.lock() {
            Ok(addr) => *addr,
            Err(e) => {
                error!("Failed to read listener address: {e}");
                None
            }
        };
        if let Some(mut addr) = listen_addr {
            if addr.ip().is_unspecified() {
                addr.set_ip(Ipv4Addr::LOCALHOST.into());
            }
            // the accept loop only notices the flag on its next connection
            if let Ok(stream) = TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        info!("Node {} stopped", self.node_id);
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        let remote = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                error!("Failed to get peer address: {e}");
                return;
            }
        };
        if !self.is_running() {
            return;
        }
        if let Err(e) = stream.set_read_timeout(Some(CONNECTION_IDLE_TIMEOUT)) {
            warn!("Failed to set read timeout for {remote}: {e}");
        }

        info!("New connection from {remote}");
        self.messenger.known_nodes().add_node(&remote);
        self.peers.add_peer(&remote);

        loop {
            let message = match read_message(&mut stream) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading message from {remote}: {e}");
                    break;
                }
            };
            match self.dispatch(&message, &mut stream) {
                Ok(()) => {}
                Err(NodeError::Decode(e)) => {
                    warn!("Malformed {} payload from {remote}: {e}", message.command);
                    break;
                }
                Err(e) => error!("Error processing {} from {remote}: {e}", message.command),
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        self.messenger.known_nodes().evict_node(&remote);
        self.peers.remove_peer(&remote);
        info!("Connection from {remote} closed");
    }

    /// Route one message to its handler. `reply` is the connection the
    /// message arrived on.
    pub fn dispatch(&self, message: &Message, reply: &mut dyn Write) -> Result<()> {
        let packet = Packet::from_message(message)?;
        info!("Received {} from {}", packet.command(), packet.addr_from());

        match packet {
            Packet::Version(payload) => self.handle_version(payload),
            Packet::GetBlocks(payload) => self.handle_get_blocks(payload),
            Packet::Inv(payload) => self.handle_inv(payload),
            Packet::GetData(payload) => self.handle_get_data(payload),
            Packet::Block(payload) => self.handle_block(payload),
            Packet::Tx(payload) => self.handle_tx(payload),
            Packet::Ping(payload) => self.handle_ping(payload, reply),
            Packet::Pong(payload) => {
                debug!("Ignoring unsolicited pong from {}", payload.addr_from);
                Ok(())
            }
        }
    }

    fn handle_version(&self, payload: VersionPayload) -> Result<()> {
        let VersionPayload {
            version,
            best_height,
            addr_from,
        } = payload;
        info!("Version message from {addr_from}, best_height={best_height}");

        if !same_endpoint(&addr_from, &self.address) {
            self.messenger.known_nodes().add_node(&addr_from);
            self.peers.update_peer_info(&addr_from, best_height, version);
        }

        let local_best_height = self.ledger.best_height()?;
        if local_best_height < best_height {
            self.messenger.send_get_blocks(&addr_from)?;
        } else if local_best_height > best_height {
            self.messenger.send_version(&addr_from, local_best_height)?;
        }
        Ok(())
    }

    fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<()> {
        let hashes = self.ledger.block_hashes()?;
        self.messenger
            .send_inv(&payload.addr_from, InvKind::Block, &hashes)
    }

    fn handle_inv(&self, payload: InvPayload) -> Result<()> {
        let InvPayload {
            addr_from,
            kind,
            items,
        } = payload;
        info!("Received inventory with {} {kind}", items.len());

        match InvKind::parse(&kind) {
            Some(InvKind::Block) => {
                if items.is_empty() {
                    warn!("Empty block inventory from {addr_from}");
                    return Ok(());
                }
                if let Some(hash) = self.sync.begin_session(&addr_from, items)? {
                    self.messenger
                        .send_get_data(&addr_from, InvKind::Block, &hash)?;
                }
            }
            Some(InvKind::Tx) => {
                for id in items.iter().filter(|id| !self.mempool.has_transaction(id)) {
                    self.messenger.send_get_data(&addr_from, InvKind::Tx, id)?;
                }
            }
            None => warn!("Unknown inventory type {kind} from {addr_from}"),
        }
        Ok(())
    }

    fn handle_get_data(&self, payload: GetDataPayload) -> Result<()> {
        let GetDataPayload {
            addr_from,
            kind,
            id,
        } = payload;

        match InvKind::parse(&kind) {
            Some(InvKind::Block) => match self.ledger.block(&id) {
                Ok(block) => self.messenger.send_block(&addr_from, block.serialize()?),
                Err(e) => {
                    info!("Block not found for {addr_from}: {e}");
                    Ok(())
                }
            },
            Some(InvKind::Tx) => match self.mempool.get_transaction(&id) {
                Some(tx) => self.messenger.send_tx(&addr_from, tx.serialize()?),
                None => {
                    info!(
                        "Transaction {} not in mempool, ignoring request from {addr_from}",
                        HEXLOWER.encode(&id)
                    );
                    Ok(())
                }
            },
            None => {
                warn!("Unknown getdata type {kind} from {addr_from}");
                Ok(())
            }
        }
    }

    fn handle_block(&self, payload: BlockPayload) -> Result<()> {
        let BlockPayload { addr_from, block } = payload;
        let block = <L::Block as BlockRecord>::deserialize(&block)?;
        let hash = HEXLOWER.encode(&block.hash());
        let confirmed = block.transaction_ids();

        self.ledger.add_block(block)?;
        info!("Added block {hash} from {addr_from}");
        self.mempool.remove_confirmed_transactions(&confirmed);

        match self.sync.next_block(&addr_from)? {
            Some(next) => self
                .messenger
                .send_get_data(&addr_from, InvKind::Block, &next),
            None => Ok(()),
        }
    }

    fn handle_tx(&self, payload: TxPayload) -> Result<()> {
        let TxPayload {
            addr_from,
            transaction,
        } = payload;
        let tx = <L::Transaction as TransactionRecord>::deserialize(&transaction)?;
        self.mempool.validate_transaction(&tx)?;

        match self.mempool.add_transaction(tx) {
            Err(NodeError::DuplicateTransaction(id)) => {
                debug!("Transaction {id} from {addr_from} already pooled");
                Ok(())
            }
            other => other,
        }
    }

    fn handle_ping(&self, payload: PingPayload, reply: &mut dyn Write) -> Result<()> {
        debug!("Ping from {}", payload.addr_from);
        let pong = self.messenger.pong_packet().to_message()?;
        write_message(reply, &pong)
    }

    pub fn send_message(&self, addr: &str, message: &Message) -> Result<()> {
        self.messenger.send_message(addr, message)
    }

    pub fn broadcast_message(&self, message: &Message) -> Vec<JoinHandle<bool>> {
        self.messenger.broadcast_message(message)
    }

    /// Connect through the peer manager, which sends our version handshake
    pub fn connect_to_peer(&self, addr: &str) -> Result<()> {
        self.peers.connect_to_peer(addr)
    }

    /// Join the network. A non-empty `seeds` replaces the configured bootstrap list.
    pub fn bootstrap(&self, seeds: &[String]) -> Result<usize> {
        if !seeds.is_empty() {
            self.peers.set_bootstrap_nodes(seeds.to_vec());
        }
        self.peers.bootstrap()
    }

    pub fn get_known_nodes(&self) -> Vec<String> {
        self.messenger.known_nodes().addresses()
    }

    pub fn get_node_info(&self) -> NodeInfo {
        let height = self.ledger.best_height().unwrap_or_else(|e| {
            error!("Failed to read best height: {e}");
            -1
        });
        NodeInfo {
            address: self.address.clone(),
            node_id: self.node_id.clone(),
            is_running: self.is_running(),
            height,
            network: self.peers.get_network_info(),
            mempool: self.mempool.get_mempool_info(),
            sync_status: self.sync.get_sync_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::{GetBlocksPayload, PongPayload};
    use crate::testnet::{FakeBlock, FakeTransaction, MemoryLedger, RecordingTransport};

    const PEER: &str = "127.0.0.1:4001";

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_address: "127.0.0.1:4000".to_string(),
            bootstrap_nodes: vec![],
            ..NodeConfig::default()
        }
    }

    fn test_server(ledger: MemoryLedger) -> (Server<MemoryLedger>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let server = Server::with_transport(
            &test_config(),
            Arc::new(ledger),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap();
        (server, transport)
    }

    fn deliver(server: &Server<MemoryLedger>, packet: Packet) -> Vec<u8> {
        let mut reply = Vec::new();
        server
            .dispatch(&packet.to_message().unwrap(), &mut reply)
            .unwrap();
        reply
    }

    fn version(best_height: i32) -> Packet {
        Packet::Version(VersionPayload {
            version: 1,
            best_height,
            addr_from: PEER.to_string(),
        })
    }

    #[test]
    fn test_version_from_taller_peer_requests_blocks() {
        let (server, transport) = test_server(MemoryLedger::with_height(5));
        deliver(&server, version(10));

        assert!(matches!(transport.sent_to(PEER).as_slice(), [Packet::GetBlocks(_)]));
        let peer = server.peer_manager().get_peer(PEER).unwrap();
        assert_eq!(peer.height, 10);
        assert!(peer.is_connected());
        assert_eq!(server.get_known_nodes(), vec![PEER.to_string()]);
    }

    #[test]
    fn test_version_from_shorter_peer_gets_version_reply() {
        let (server, transport) = test_server(MemoryLedger::with_height(5));
        deliver(&server, version(2));

        match transport.sent_to(PEER).as_slice() {
            [Packet::Version(v)] => {
                assert_eq!(v.best_height, 5);
                assert_eq!(v.addr_from, "127.0.0.1:4000");
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }

    #[test]
    fn test_version_at_equal_height_sends_nothing() {
        let (server, transport) = test_server(MemoryLedger::with_height(5));
        deliver(&server, version(5));
        assert!(transport.sent_messages().is_empty());
    }

    #[test]
    fn test_getblocks_answers_with_block_inventory() {
        let (server, transport) = test_server(MemoryLedger::with_height(2));
        deliver(
            &server,
            Packet::GetBlocks(GetBlocksPayload {
                addr_from: PEER.to_string(),
            }),
        );

        match transport.sent_to(PEER).as_slice() {
            [Packet::Inv(inv)] => {
                assert_eq!(inv.kind, "block");
                assert_eq!(inv.items, vec![b"b2".to_vec(), b"b1".to_vec(), b"b0".to_vec()]);
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }

    fn block_inv(items: Vec<Vec<u8>>) -> Packet {
        Packet::Inv(InvPayload {
            addr_from: PEER.to_string(),
            kind: "block".to_string(),
            items,
        })
    }

    #[test]
    fn test_block_inventory_requests_first_and_queues_rest() {
        let (server, transport) = test_server(MemoryLedger::new());
        deliver(
            &server,
            block_inv(vec![b"h1".to_vec(), b"h2".to_vec(), b"h3".to_vec()]),
        );

        match transport.sent_to(PEER).as_slice() {
            [Packet::GetData(get)] => {
                assert_eq!(get.kind, "block");
                assert_eq!(get.id, b"h1".to_vec());
            }
            other => panic!("unexpected packets {other:?}"),
        }
        assert_eq!(
            server.sync_manager().session(PEER),
            vec![b"h2".to_vec(), b"h3".to_vec()]
        );
    }

    #[test]
    fn test_empty_block_inventory_ignored() {
        let (server, transport) = test_server(MemoryLedger::new());
        deliver(&server, block_inv(vec![]));
        assert!(transport.sent_messages().is_empty());
        assert!(server.sync_manager().is_synced());
    }

    #[test]
    fn test_block_pulls_next_in_transit_and_strips_mempool() {
        let (server, transport) = test_server(MemoryLedger::new());
        server
            .mempool()
            .add_transaction(FakeTransaction::new(b"t1", b"x"))
            .unwrap();
        deliver(&server, block_inv(vec![b"h1".to_vec(), b"h2".to_vec()]));
        transport.clear();

        let block = FakeBlock::new(b"h1", 0).with_transactions(&[b"t1"]);
        deliver(
            &server,
            Packet::Block(BlockPayload {
                addr_from: PEER.to_string(),
                block: BlockRecord::serialize(&block).unwrap(),
            }),
        );

        assert_eq!(server.ledger().best_height().unwrap(), 0);
        assert!(!server.mempool().has_transaction(b"t1"));
        match transport.sent_to(PEER).as_slice() {
            [Packet::GetData(get)] => assert_eq!(get.id, b"h2".to_vec()),
            other => panic!("unexpected packets {other:?}"),
        }
        assert!(server.sync_manager().is_synced());

        // a drained session asks for nothing more
        transport.clear();
        let last = FakeBlock::new(b"h2", 1);
        deliver(
            &server,
            Packet::Block(BlockPayload {
                addr_from: PEER.to_string(),
                block: BlockRecord::serialize(&last).unwrap(),
            }),
        );
        assert!(transport.sent_messages().is_empty());
        assert_eq!(server.ledger().best_height().unwrap(), 1);
    }

    #[test]
    fn test_tx_inventory_requests_only_unknown() {
        let (server, transport) = test_server(MemoryLedger::new());
        server
            .mempool()
            .add_transaction(FakeTransaction::new(b"have", b"x"))
            .unwrap();

        deliver(
            &server,
            Packet::Inv(InvPayload {
                addr_from: PEER.to_string(),
                kind: "tx".to_string(),
                items: vec![b"have".to_vec(), b"want".to_vec()],
            }),
        );

        match transport.sent_to(PEER).as_slice() {
            [Packet::GetData(get)] => {
                assert_eq!(get.kind, "tx");
                assert_eq!(get.id, b"want".to_vec());
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }

    #[test]
    fn test_getdata_serves_blocks_and_transactions() {
        let (server, transport) = test_server(MemoryLedger::with_height(1));
        let tx = FakeTransaction::new(b"t1", b"payload");
        server.mempool().add_transaction(tx.clone()).unwrap();

        let getdata = |kind: &str, id: &[u8]| {
            Packet::GetData(GetDataPayload {
                addr_from: PEER.to_string(),
                kind: kind.to_string(),
                id: id.to_vec(),
            })
        };
        deliver(&server, getdata("block", b"b1"));
        deliver(&server, getdata("tx", b"t1"));
        deliver(&server, getdata("block", b"missing"));
        deliver(&server, getdata("tx", b"missing"));

        match transport.sent_to(PEER).as_slice() {
            [Packet::Block(block), Packet::Tx(sent_tx)] => {
                assert_eq!(FakeBlock::deserialize(&block.block).unwrap().height, 1);
                assert_eq!(FakeTransaction::deserialize(&sent_tx.transaction).unwrap(), tx);
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }

    #[test]
    fn test_tx_is_validated_and_pooled() {
        let (server, _) = test_server(MemoryLedger::new());
        let tx = FakeTransaction::new(b"t9", b"data");
        let packet = Packet::Tx(TxPayload {
            addr_from: PEER.to_string(),
            transaction: TransactionRecord::serialize(&tx).unwrap(),
        });

        deliver(&server, packet.clone());
        deliver(&server, packet);
        assert_eq!(server.mempool().get_all_transactions(), vec![tx]);

        let invalid = Packet::Tx(TxPayload {
            addr_from: PEER.to_string(),
            transaction: TransactionRecord::serialize(&FakeTransaction::new(b"", b"data"))
                .unwrap(),
        });
        let result = server.dispatch(&invalid.to_message().unwrap(), &mut Vec::new());
        assert!(matches!(result, Err(NodeError::InvalidTransaction(_))));
    }

    #[test]
    fn test_ping_writes_pong_on_same_connection() {
        let (server, transport) = test_server(MemoryLedger::new());
        let reply = deliver(
            &server,
            Packet::Ping(PingPayload {
                addr_from: PEER.to_string(),
            }),
        );

        let message = read_message(&mut reply.as_slice()).unwrap().unwrap();
        assert_eq!(
            Packet::from_message(&message).unwrap(),
            Packet::Pong(PongPayload {
                addr_from: "127.0.0.1:4000".to_string()
            })
        );
        assert!(transport.sent_messages().is_empty());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let (server, _) = test_server(MemoryLedger::new());
        let message = Message {
            command: "addr".to_string(),
            payload: vec![],
        };
        assert_eq!(
            server.dispatch(&message, &mut Vec::new()),
            Err(NodeError::UnknownCommand("addr".to_string()))
        );
    }

    #[test]
    fn test_handshake_dialer_measures_ping() {
        let (server, transport) = test_server(MemoryLedger::with_height(3));
        let dialer = HandshakeDialer::new(Arc::clone(&server.messenger), Arc::clone(server.ledger()));

        dialer.handshake(PEER).unwrap();
        assert!(server.get_known_nodes().contains(&PEER.to_string()));
        assert!(dialer.ping(PEER).unwrap().is_some());

        transport.set_answer_pings(false);
        assert_eq!(dialer.ping(PEER).unwrap(), None);
        transport.fail_address(PEER);
        assert!(dialer.ping(PEER).is_err());
    }

    #[test]
    fn test_bootstrap_replaces_seeds_and_connects() {
        let (server, transport) = test_server(MemoryLedger::with_height(0));
        let seeds = vec!["127.0.0.1:4001".to_string(), "127.0.0.1:4002".to_string()];

        assert_eq!(server.bootstrap(&seeds), Ok(2));
        assert_eq!(server.peer_manager().connected_peer_count(), 2);
        assert_eq!(transport.sent_to("127.0.0.1:4002").len(), 1);

        let info = server.get_node_info();
        assert_eq!(info.node_id, "node_4000");
        assert_eq!(info.network.connected_peers, 2);
        assert_eq!(info.network.bootstrap_nodes, seeds);
        assert_eq!(info.height, 0);
        assert!(!info.is_running);
    }

    #[test]
    fn test_bootstrap_without_reachable_seeds() {
        let (server, transport) = test_server(MemoryLedger::new());
        transport.fail_address("127.0.0.1:4001");
        assert_eq!(
            server.bootstrap(&["127.0.0.1:4001".to_string()]),
            Err(NodeError::NoBootstrapReachable)
        );
    }

    #[test]
    fn test_serve_and_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (server, _) = test_server(MemoryLedger::new());
        let server = Arc::new(server);

        let running = Arc::clone(&server);
        let handle = thread::spawn(move || running.serve(listener));
        for _ in 0..50 {
            if server.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(server.is_running());
        assert!(server.peer_manager().is_running());

        server.stop();
        handle.join().unwrap().unwrap();
        assert!(!server.is_running());
        assert!(!server.peer_manager().is_running());
    }
}
