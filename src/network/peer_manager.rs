use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::utils::PeriodicTask;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Whether two `host:port` addresses name the same endpoint.
///
/// Loopback spellings (`localhost`, `127.0.0.1`, `::1`, `0.0.0.0`) count as
/// one host. No name resolution happens here.
pub fn same_endpoint(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (split_host_port(a), split_host_port(b)) {
        (Some((host_a, port_a)), Some((host_b, port_b))) => {
            port_a == port_b
                && (host_a.eq_ignore_ascii_case(host_b)
                    || (is_loopback_host(host_a) && is_loopback_host(host_b)))
        }
        _ => false,
    }
}

fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host, port.parse().ok()?))
}

fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}

/// Transport-level actions the peer manager needs from the server
pub trait PeerDialer: Send + Sync {
    /// Announce ourselves to `addr`; success means the version message was delivered
    fn handshake(&self, addr: &str) -> Result<()>;

    /// Ping `addr`. `Err` when the ping could not be sent, otherwise the
    /// round-trip time if a pong came back.
    fn ping(&self, addr: &str) -> Result<Option<Duration>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerStatus {
    Connecting,
    Connected,
    Disconnected,
    Banned,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Connecting => write!(f, "connecting"),
            PeerStatus::Connected => write!(f, "connected"),
            PeerStatus::Disconnected => write!(f, "disconnected"),
            PeerStatus::Banned => write!(f, "banned"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub address: String,
    pub status: PeerStatus,
    pub last_seen: Instant,
    pub height: i32,
    pub version: i32,
    pub latency: Option<Duration>,
    pub ban_reason: Option<String>,
    /// Order in which the peer was first recorded
    seq: u64,
}

impl Peer {
    fn new(address: &str, status: PeerStatus, seq: u64) -> Peer {
        Peer {
            address: address.to_string(),
            status,
            last_seen: Instant::now(),
            height: 0,
            version: 0,
            latency: None,
            ban_reason: None,
            seq,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == PeerStatus::Connected
    }

    fn occupies_slot(&self) -> bool {
        matches!(self.status, PeerStatus::Connected | PeerStatus::Connecting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub total_peers: usize,
    pub connected_peers: usize,
    pub max_peers: usize,
    pub is_running: bool,
    pub bootstrap_nodes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub max_peers: usize,
    pub bootstrap_target: usize,
    pub discovery_interval: Duration,
    pub maintenance_interval: Duration,
    pub health_check_interval: Duration,
    pub stale_threshold: Duration,
}

impl From<&NodeConfig> for PeerSettings {
    fn from(config: &NodeConfig) -> Self {
        PeerSettings {
            max_peers: config.max_peers,
            bootstrap_target: config.bootstrap_target,
            discovery_interval: config.discovery_interval(),
            maintenance_interval: config.maintenance_interval(),
            health_check_interval: config.health_check_interval(),
            stale_threshold: config.stale_peer_threshold(),
        }
    }
}

impl Default for PeerSettings {
    fn default() -> Self {
        PeerSettings::from(&NodeConfig::default())
    }
}

#[derive(Default)]
struct PeerTable {
    peers: HashMap<String, Peer>,
    next_seq: u64,
}

impl PeerTable {
    fn insert_new(&mut self, address: &str, status: PeerStatus) -> &mut Peer {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.peers
            .entry(address.to_string())
            .or_insert_with(|| Peer::new(address, status, seq))
    }

    fn connected_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_connected()).count()
    }

    fn occupied_slots(&self) -> usize {
        self.peers.values().filter(|p| p.occupies_slot()).count()
    }

    fn sorted(&self, filter: impl Fn(&Peer) -> bool) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().filter(|p| filter(p)).cloned().collect();
        peers.sort_by_key(|p| p.seq);
        peers
    }
}

/// Owns the peer table and the discovery, maintenance and health-check tasks.
///
/// Peer states move Connecting -> Connected -> Disconnected and back to
/// Connecting on reconnect. Banned is absorbing: nothing in this manager
/// ever moves a peer out of it.
pub struct PeerManager {
    local_addr: String,
    settings: PeerSettings,
    dialer: Arc<dyn PeerDialer>,
    table: RwLock<PeerTable>,
    bootstrap_nodes: RwLock<Vec<String>>,
    running: AtomicBool,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl PeerManager {
    pub fn new(
        local_addr: &str,
        settings: PeerSettings,
        bootstrap_nodes: Vec<String>,
        dialer: Arc<dyn PeerDialer>,
    ) -> PeerManager {
        PeerManager {
            local_addr: local_addr.to_string(),
            settings,
            dialer,
            table: RwLock::new(PeerTable::default()),
            bootstrap_nodes: RwLock::new(bootstrap_nodes),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn is_self(&self, address: &str) -> bool {
        same_endpoint(address, &self.local_addr)
    }

    fn table_read(&self) -> Result<RwLockReadGuard<'_, PeerTable>> {
        self.table
            .read()
            .map_err(|e| NodeError::Lock(format!("peer table: {e}")))
    }

    fn table_write(&self) -> Result<RwLockWriteGuard<'_, PeerTable>> {
        self.table
            .write()
            .map_err(|e| NodeError::Lock(format!("peer table: {e}")))
    }

    pub fn max_peers(&self) -> usize {
        self.settings.max_peers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the three background tasks. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let discovery = {
            let manager = Arc::downgrade(self);
            PeriodicTask::spawn("peer-discovery", self.settings.discovery_interval, move || {
                if let Some(manager) = manager.upgrade() {
                    if manager.is_running() {
                        manager.discover_peers();
                    }
                }
            })
        };
        let maintenance = {
            let manager = Arc::downgrade(self);
            PeriodicTask::spawn(
                "peer-maintenance",
                self.settings.maintenance_interval,
                move || {
                    if let Some(manager) = manager.upgrade() {
                        if manager.is_running() {
                            manager.maintain_peers();
                        }
                    }
                },
            )
        };
        let health_check = {
            let manager = Arc::downgrade(self);
            PeriodicTask::spawn(
                "peer-health-check",
                self.settings.health_check_interval,
                move || {
                    if let Some(manager) = manager.upgrade() {
                        if manager.is_running() {
                            manager.perform_health_check();
                        }
                    }
                },
            )
        };

        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend([discovery, maintenance, health_check]),
            Err(e) => error!("Failed to record peer manager tasks: {e}"),
        }
        info!("Node manager started");
    }

    /// Stop and join the background tasks. Safe to call repeatedly.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let tasks: Vec<PeriodicTask> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(e) => {
                error!("Failed to access peer manager tasks: {e}");
                Vec::new()
            }
        };
        for mut task in tasks {
            task.stop();
        }
        if was_running {
            info!("Node manager stopped");
        }
    }

    /// Connect to the configured seeds in order until `bootstrap_target`
    /// succeed. Returns the number of connections made.
    pub fn bootstrap(&self) -> Result<usize> {
        let seeds = self.bootstrap_nodes();
        info!("Starting bootstrap process with {} seeds", seeds.len());

        if seeds.is_empty() {
            warn!("No bootstrap nodes configured");
            return Err(NodeError::NoBootstrapReachable);
        }

        let mut connected = 0;
        for seed in seeds.iter().filter(|s| !self.is_self(s)) {
            info!("Attempting to connect to bootstrap node: {seed}");
            match self.connect_to_peer(seed) {
                Ok(()) => {
                    connected += 1;
                    info!("Connected to bootstrap node: {seed}");
                    if connected >= self.settings.bootstrap_target {
                        break;
                    }
                }
                Err(e) => warn!("Failed to connect to bootstrap node {seed}: {e}"),
            }
        }

        if connected == 0 {
            return Err(NodeError::NoBootstrapReachable);
        }
        info!("Bootstrap completed, connected to {connected} nodes");
        Ok(connected)
    }

    pub fn connect_to_peer(&self, address: &str) -> Result<()> {
        if self.is_self(address) {
            return Err(NodeError::SelfConnection(address.to_string()));
        }

        {
            let mut table = self.table_write()?;
            if let Some(peer) = table.peers.get(address) {
                match peer.status {
                    PeerStatus::Banned => return Err(NodeError::PeerBanned(address.to_string())),
                    PeerStatus::Connected | PeerStatus::Connecting => {
                        return Err(NodeError::AlreadyConnected(address.to_string()));
                    }
                    PeerStatus::Disconnected => {}
                }
            }
            // in-flight connects hold a slot so concurrent attempts cannot overshoot
            if table.occupied_slots() >= self.settings.max_peers {
                return Err(NodeError::PeerLimitReached(self.settings.max_peers));
            }
            let peer = table.insert_new(address, PeerStatus::Connecting);
            peer.status = PeerStatus::Connecting;
            peer.last_seen = Instant::now();
        }

        let outcome = self.dialer.handshake(address);

        let mut table = self.table_write()?;
        let peer = table.peers.get_mut(address);
        match outcome {
            Ok(()) => {
                if let Some(peer) = peer {
                    if peer.status == PeerStatus::Connecting {
                        peer.status = PeerStatus::Connected;
                        peer.last_seen = Instant::now();
                    }
                }
                info!("Successfully connected to peer: {address}");
                Ok(())
            }
            Err(e) => {
                if let Some(peer) = peer {
                    if peer.status == PeerStatus::Connecting {
                        peer.status = PeerStatus::Disconnected;
                    }
                }
                Err(e)
            }
        }
    }

    pub fn disconnect_from_peer(&self, address: &str) {
        match self.table_write() {
            Ok(mut table) => {
                if let Some(peer) = table.peers.get_mut(address) {
                    if peer.status != PeerStatus::Banned
                        && peer.status != PeerStatus::Disconnected
                    {
                        peer.status = PeerStatus::Disconnected;
                        info!("Disconnected from peer: {address}");
                    }
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    pub fn add_peer(&self, address: &str) {
        if self.is_self(address) {
            return;
        }
        match self.table_write() {
            Ok(mut table) => {
                if !table.peers.contains_key(address) {
                    table.insert_new(address, PeerStatus::Disconnected);
                    info!("Added new peer: {address}");
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    pub fn remove_peer(&self, address: &str) {
        match self.table_write() {
            Ok(mut table) => {
                if table.peers.remove(address).is_some() {
                    info!("Removed peer: {address}");
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    /// Record what a peer told us in its version message.
    ///
    /// A peer that is not yet connected only becomes Connected while there
    /// is a free slot; otherwise its height and version are still recorded.
    pub fn update_peer_info(&self, address: &str, height: i32, version: i32) {
        if self.is_self(address) {
            return;
        }
        match self.table_write() {
            Ok(mut table) => {
                // a peer already Connecting holds its own slot
                let holds_slot = table.peers.get(address).is_some_and(Peer::occupies_slot);
                let others = table.occupied_slots() - usize::from(holds_slot);
                let has_slot = others < self.settings.max_peers;
                let peer = table.insert_new(address, PeerStatus::Disconnected);
                peer.height = height;
                peer.version = version;
                peer.last_seen = Instant::now();
                match peer.status {
                    PeerStatus::Banned | PeerStatus::Connected => {}
                    _ if has_slot => peer.status = PeerStatus::Connected,
                    _ => debug!("Peer table full, {address} stays {}", peer.status),
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    pub fn record_latency(&self, address: &str, latency: Duration) {
        match self.table_write() {
            Ok(mut table) => {
                if let Some(peer) = table.peers.get_mut(address) {
                    peer.latency = Some(latency);
                    peer.last_seen = Instant::now();
                }
            }
            Err(e) => error!("{e}"),
        }
    }

    /// Ban a peer; unknown addresses get a banned entry so they cannot be dialed later
    pub fn ban_peer(&self, address: &str, reason: &str) {
        if self.is_self(address) {
            return;
        }
        match self.table_write() {
            Ok(mut table) => {
                let peer = table.insert_new(address, PeerStatus::Banned);
                peer.status = PeerStatus::Banned;
                peer.ban_reason = Some(reason.to_string());
                warn!("Banned peer {address}: {reason}");
            }
            Err(e) => error!("{e}"),
        }
    }

    pub fn is_peer_banned(&self, address: &str) -> bool {
        self.get_peer(address)
            .is_some_and(|p| p.status == PeerStatus::Banned)
    }

    pub fn get_peer(&self, address: &str) -> Option<Peer> {
        match self.table_read() {
            Ok(table) => table.peers.get(address).cloned(),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    pub fn get_connected_peers(&self) -> Vec<Peer> {
        match self.table_read() {
            Ok(table) => table.sorted(Peer::is_connected),
            Err(e) => {
                error!("{e}");
                Vec::new()
            }
        }
    }

    pub fn get_all_peers(&self) -> Vec<Peer> {
        match self.table_read() {
            Ok(table) => table.sorted(|_| true),
            Err(e) => {
                error!("{e}");
                Vec::new()
            }
        }
    }

    /// Connected peers by advertised height, tallest first; equal heights
    /// keep first-seen order.
    pub fn get_best_peers(&self, limit: usize) -> Vec<Peer> {
        let mut peers = self.get_connected_peers();
        peers.sort_by(|a, b| b.height.cmp(&a.height).then(a.seq.cmp(&b.seq)));
        peers.truncate(limit);
        peers
    }

    pub fn peer_count(&self) -> usize {
        self.table_read().map(|t| t.peers.len()).unwrap_or(0)
    }

    pub fn connected_peer_count(&self) -> usize {
        self.table_read().map(|t| t.connected_count()).unwrap_or(0)
    }

    pub fn bootstrap_nodes(&self) -> Vec<String> {
        match self.bootstrap_nodes.read() {
            Ok(nodes) => nodes.clone(),
            Err(e) => {
                error!("Failed to read bootstrap nodes: {e}");
                Vec::new()
            }
        }
    }

    pub fn set_bootstrap_nodes(&self, nodes: Vec<String>) {
        match self.bootstrap_nodes.write() {
            Ok(mut current) => {
                info!("Set bootstrap nodes: {nodes:?}");
                *current = nodes;
            }
            Err(e) => error!("Failed to update bootstrap nodes: {e}"),
        }
    }

    pub fn add_bootstrap_node(&self, node: &str) {
        match self.bootstrap_nodes.write() {
            Ok(mut current) => {
                if !current.iter().any(|n| n == node) {
                    current.push(node.to_string());
                    info!("Added bootstrap node: {node}");
                }
            }
            Err(e) => error!("Failed to update bootstrap nodes: {e}"),
        }
    }

    pub fn get_network_info(&self) -> NetworkInfo {
        let (total_peers, connected_peers) = match self.table_read() {
            Ok(table) => (table.peers.len(), table.connected_count()),
            Err(e) => {
                error!("{e}");
                (0, 0)
            }
        };
        NetworkInfo {
            total_peers,
            connected_peers,
            max_peers: self.settings.max_peers,
            is_running: self.is_running(),
            bootstrap_nodes: self.bootstrap_nodes(),
        }
    }

    /// Reconnect to a bootstrap node when the connected set is thin.
    /// Returns true when a new connection was made.
    pub fn discover_peers(&self) -> bool {
        let connected = self.connected_peer_count();
        if connected >= self.settings.max_peers / 2 || connected >= 2 {
            return false;
        }

        info!("Discovering new peers ({connected} connected)");
        for seed in self.bootstrap_nodes() {
            if self.is_self(&seed) || self.is_peer_banned(&seed) {
                continue;
            }
            match self.connect_to_peer(&seed) {
                Ok(()) => return true,
                Err(e) => debug!("Discovery could not use {seed}: {e}"),
            }
        }
        false
    }

    /// Drop peers not seen within the staleness threshold. Banned peers stay.
    pub fn maintain_peers(&self) -> Vec<String> {
        let mut table = match self.table_write() {
            Ok(table) => table,
            Err(e) => {
                error!("{e}");
                return Vec::new();
            }
        };

        let threshold = self.settings.stale_threshold;
        let stale: Vec<String> = table
            .peers
            .values()
            .filter(|p| p.status != PeerStatus::Banned && p.last_seen.elapsed() > threshold)
            .map(|p| p.address.clone())
            .collect();

        for address in &stale {
            table.peers.remove(address);
            info!("Removed stale peer: {address}");
        }
        if !stale.is_empty() {
            info!("Removed {} stale peers", stale.len());
        }
        stale
    }

    /// Ping every connected peer on its own thread; failed pings disconnect.
    pub fn perform_health_check(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.get_connected_peers()
            .into_iter()
            .map(|peer| {
                let manager = Arc::clone(self);
                thread::spawn(move || manager.ping_peer(&peer.address))
            })
            .collect()
    }

    fn ping_peer(&self, address: &str) {
        match self.dialer.ping(address) {
            Ok(Some(latency)) => self.record_latency(address, latency),
            Ok(None) => debug!("No pong from {address}"),
            Err(e) => {
                warn!("Failed to ping peer {address}: {e}");
                self.disconnect_from_peer(address);
            }
        }
    }
}
