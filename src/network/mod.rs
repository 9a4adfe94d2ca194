//! Peer-to-peer networking
//!
//! Framed TCP messaging between nodes, the peer table, the transaction pool
//! and chain synchronization. The server owns the listener and routes each
//! inbound message to the manager that handles it.

pub mod mempool;
pub mod message;
pub mod messenger;
pub mod node;
pub mod peer_manager;
pub mod server;
pub mod sync;
pub mod transport;

pub use mempool::{MempoolEntry, MempoolInfo, MempoolManager, MempoolSettings};
pub use message::{read_message, write_message, Command, InvKind, Message, Packet, NODE_VERSION};
pub use messenger::Messenger;
pub use node::{Node, Nodes};
pub use peer_manager::{NetworkInfo, Peer, PeerDialer, PeerManager, PeerSettings, PeerStatus};
pub use server::{HandshakeDialer, NodeInfo, Server};
pub use sync::{ChainInfo, SyncManager, SyncStatus};
pub use transport::{TcpTransport, Transport};
