//! Wire protocol: `[4-byte big-endian length][bincode envelope]`.
//!
//! The envelope is `{command, payload}`; the payload is itself a bincode
//! record whose shape depends on the command. Unknown commands survive
//! framing and are only rejected when converted into a [`Packet`].

use crate::error::{NodeError, Result};
use crate::utils::serialization::DECODE_LIMIT;
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{ErrorKind, Read, Write};

pub const NODE_VERSION: i32 = 1;

/// Upper bound on a single frame; larger prefixes are treated as corrupt
pub const MAX_FRAME_LEN: usize = DECODE_LIMIT;

const LENGTH_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Ping,
    Pong,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Version,
        Command::GetBlocks,
        Command::Inv,
        Command::GetData,
        Command::Block,
        Command::Tx,
        Command::Ping,
        Command::Pong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Ping => "ping",
            Command::Pong => "pong",
        }
    }

    pub fn parse(tag: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.as_str() == tag)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item type carried by inv and getdata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
    Tx,
}

impl InvKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvKind::Block => "block",
            InvKind::Tx => "tx",
        }
    }

    pub fn parse(kind: &str) -> Option<InvKind> {
        match kind {
            "block" => Some(InvKind::Block),
            "tx" => Some(InvKind::Tx),
            _ => None,
        }
    }
}

/// The framed envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Message {
    pub command: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, payload: Vec<u8>) -> Message {
        Message {
            command: command.as_str().to_string(),
            payload,
        }
    }

    /// `None` for a command tag this node does not know
    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.command)
    }

    /// Envelope bytes, without the length prefix
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Message> {
        deserialize(bytes)
    }

    /// Length-prefixed frame ready for the socket
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let body = self.encode()?;
        let len = u32::try_from(body.len())
            .map_err(|_| NodeError::Serialization("Message exceeds u32 length".to_string()))?;
        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct VersionPayload {
    pub version: i32,
    pub best_height: i32,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct InvPayload {
    pub addr_from: String,
    /// "block" or "tx"
    pub kind: String,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: String,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PingPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PongPayload {
    pub addr_from: String,
}

/// A decoded message with a typed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Version(VersionPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    Ping(PingPayload),
    Pong(PongPayload),
}

impl Packet {
    pub fn command(&self) -> Command {
        match self {
            Packet::Version(_) => Command::Version,
            Packet::GetBlocks(_) => Command::GetBlocks,
            Packet::Inv(_) => Command::Inv,
            Packet::GetData(_) => Command::GetData,
            Packet::Block(_) => Command::Block,
            Packet::Tx(_) => Command::Tx,
            Packet::Ping(_) => Command::Ping,
            Packet::Pong(_) => Command::Pong,
        }
    }

    pub fn addr_from(&self) -> &str {
        match self {
            Packet::Version(p) => &p.addr_from,
            Packet::GetBlocks(p) => &p.addr_from,
            Packet::Inv(p) => &p.addr_from,
            Packet::GetData(p) => &p.addr_from,
            Packet::Block(p) => &p.addr_from,
            Packet::Tx(p) => &p.addr_from,
            Packet::Ping(p) => &p.addr_from,
            Packet::Pong(p) => &p.addr_from,
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        let payload = match self {
            Packet::Version(p) => serialize(p)?,
            Packet::GetBlocks(p) => serialize(p)?,
            Packet::Inv(p) => serialize(p)?,
            Packet::GetData(p) => serialize(p)?,
            Packet::Block(p) => serialize(p)?,
            Packet::Tx(p) => serialize(p)?,
            Packet::Ping(p) => serialize(p)?,
            Packet::Pong(p) => serialize(p)?,
        };
        Ok(Message::new(self.command(), payload))
    }

    pub fn from_message(message: &Message) -> Result<Packet> {
        let command = message
            .command()
            .ok_or_else(|| NodeError::UnknownCommand(message.command.clone()))?;
        let bytes = message.payload.as_slice();

        let packet = match command {
            Command::Version => Packet::Version(deserialize(bytes)?),
            Command::GetBlocks => Packet::GetBlocks(deserialize(bytes)?),
            Command::Inv => Packet::Inv(deserialize(bytes)?),
            Command::GetData => Packet::GetData(deserialize(bytes)?),
            Command::Block => Packet::Block(deserialize(bytes)?),
            Command::Tx => Packet::Tx(deserialize(bytes)?),
            Command::Ping => Packet::Ping(deserialize(bytes)?),
            Command::Pong => Packet::Pong(deserialize(bytes)?),
        };
        Ok(packet)
    }
}

/// Write one length-prefixed frame
pub fn write_message<W: Write + ?Sized>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = message.to_frame()?;
    writer
        .write_all(&frame)
        .map_err(|e| NodeError::Transport(format!("Failed to write message: {e}")))?;
    writer
        .flush()
        .map_err(|e| NodeError::Transport(format!("Failed to flush message: {e}")))
}

/// Block until a full frame arrives.
///
/// Returns `Ok(None)` when the stream closes cleanly between frames. A stream
/// that closes mid-frame is a decode error.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(NodeError::Decode("Truncated length prefix".to_string()));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(NodeError::Transport(format!("Failed to read message: {e}")));
            }
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NodeError::Decode(format!(
            "Frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            NodeError::Decode(format!("Truncated frame: expected {len} bytes"))
        }
        _ => NodeError::Transport(format!("Failed to read message: {e}")),
    })?;

    Message::decode(&body).map(Some)
}
