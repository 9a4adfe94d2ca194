//! Outbound send and broadcast primitives shared by the server and managers.

use crate::error::Result;
use crate::network::message::{
    BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message, Packet,
    PingPayload, PongPayload, TxPayload, VersionPayload,
};
use crate::network::node::Nodes;
use crate::network::transport::Transport;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct Messenger {
    local_addr: String,
    protocol_version: i32,
    transport: Arc<dyn Transport>,
    known_nodes: Arc<Nodes>,
}

impl Messenger {
    pub fn new(
        local_addr: &str,
        protocol_version: i32,
        transport: Arc<dyn Transport>,
        known_nodes: Arc<Nodes>,
    ) -> Messenger {
        Messenger {
            local_addr: local_addr.to_string(),
            protocol_version,
            transport,
            known_nodes,
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn known_nodes(&self) -> &Arc<Nodes> {
        &self.known_nodes
    }

    pub fn send_message(&self, addr: &str, message: &Message) -> Result<()> {
        self.transport.send(addr, message)
    }

    pub fn send_packet(&self, addr: &str, packet: &Packet) -> Result<()> {
        let message = packet.to_message()?;
        self.send_message(addr, &message)
    }

    /// Send to every known node, one thread per node.
    ///
    /// Nodes whose send fails are dropped from the known set. The returned
    /// handles report per-node success; dropping them detaches the sends.
    pub fn broadcast_message(&self, message: &Message) -> Vec<JoinHandle<bool>> {
        let nodes = self.known_nodes.addresses();
        info!("Broadcasting {} to {} nodes", message.command, nodes.len());

        nodes
            .into_iter()
            .map(|addr| {
                let transport = Arc::clone(&self.transport);
                let known_nodes = Arc::clone(&self.known_nodes);
                let message = message.clone();
                thread::spawn(move || match transport.send(&addr, &message) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to send message to {addr}: {e}");
                        known_nodes.evict_node(&addr);
                        false
                    }
                })
            })
            .collect()
    }

    pub fn broadcast_packet(&self, packet: &Packet) -> Result<Vec<JoinHandle<bool>>> {
        let message = packet.to_message()?;
        Ok(self.broadcast_message(&message))
    }

    pub fn version_packet(&self, best_height: i32) -> Packet {
        Packet::Version(VersionPayload {
            version: self.protocol_version,
            best_height,
            addr_from: self.local_addr.clone(),
        })
    }

    pub fn pong_packet(&self) -> Packet {
        Packet::Pong(PongPayload {
            addr_from: self.local_addr.clone(),
        })
    }

    pub fn send_version(&self, addr: &str, best_height: i32) -> Result<()> {
        self.send_packet(addr, &self.version_packet(best_height))
    }

    pub fn send_get_blocks(&self, addr: &str) -> Result<()> {
        let packet = Packet::GetBlocks(GetBlocksPayload {
            addr_from: self.local_addr.clone(),
        });
        self.send_packet(addr, &packet)
    }

    pub fn send_inv(&self, addr: &str, kind: InvKind, items: &[Vec<u8>]) -> Result<()> {
        self.send_packet(addr, &self.inv_packet(kind, items))
    }

    pub fn inv_packet(&self, kind: InvKind, items: &[Vec<u8>]) -> Packet {
        Packet::Inv(InvPayload {
            addr_from: self.local_addr.clone(),
            kind: kind.as_str().to_string(),
            items: items.to_vec(),
        })
    }

    pub fn send_get_data(&self, addr: &str, kind: InvKind, id: &[u8]) -> Result<()> {
        let packet = Packet::GetData(GetDataPayload {
            addr_from: self.local_addr.clone(),
            kind: kind.as_str().to_string(),
            id: id.to_vec(),
        });
        self.send_packet(addr, &packet)
    }

    pub fn send_block(&self, addr: &str, block: Vec<u8>) -> Result<()> {
        let packet = Packet::Block(BlockPayload {
            addr_from: self.local_addr.clone(),
            block,
        });
        self.send_packet(addr, &packet)
    }

    pub fn send_tx(&self, addr: &str, transaction: Vec<u8>) -> Result<()> {
        let packet = Packet::Tx(TxPayload {
            addr_from: self.local_addr.clone(),
            transaction,
        });
        self.send_packet(addr, &packet)
    }

    /// Send a ping and wait for whatever the peer writes back
    pub fn ping(&self, addr: &str) -> Result<Option<Packet>> {
        let packet = Packet::Ping(PingPayload {
            addr_from: self.local_addr.clone(),
        });
        let reply = self.transport.request(addr, &packet.to_message()?)?;
        Ok(reply.and_then(|message| match Packet::from_message(&message) {
            Ok(packet) => Some(packet),
            Err(e) => {
                error!("Unreadable reply to ping from {addr}: {e}");
                None
            }
        }))
    }
}
