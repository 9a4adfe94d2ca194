use crate::error::{NodeError, Result};
use crate::network::message::{read_message, write_message, Message};
use log::debug;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

const TCP_WRITE_TIMEOUT: u64 = 5000;

/// Outbound delivery of framed messages.
///
/// Protocol code only talks to this trait, so a pooled or in-memory
/// implementation can replace the one-shot TCP sender.
pub trait Transport: Send + Sync {
    /// Deliver one message to `addr`
    fn send(&self, addr: &str, message: &Message) -> Result<()>;

    /// Deliver one message and wait for a single reply on the same connection.
    ///
    /// `Err` means the message was not delivered; `Ok(None)` means it was
    /// delivered but no reply arrived.
    fn request(&self, addr: &str, message: &Message) -> Result<Option<Message>>;
}

/// Opens a fresh connection per message and closes it afterwards
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(TCP_WRITE_TIMEOUT),
            Duration::from_millis(TCP_WRITE_TIMEOUT),
        )
    }
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    fn resolve(addr: &str) -> Result<SocketAddr> {
        addr.to_socket_addrs()
            .map_err(|e| NodeError::Transport(format!("Invalid address {addr}: {e}")))?
            .next()
            .ok_or_else(|| NodeError::Transport(format!("Address {addr} did not resolve")))
    }

    fn open(&self, addr: &str) -> Result<TcpStream> {
        let socket_addr = Self::resolve(addr)?;
        let stream = TcpStream::connect_timeout(&socket_addr, self.connect_timeout)
            .map_err(|e| NodeError::Transport(format!("Failed to connect to {addr}: {e}")))?;
        stream
            .set_write_timeout(Some(self.io_timeout))
            .map_err(|e| NodeError::Transport(format!("Failed to set write timeout: {e}")))?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(|e| NodeError::Transport(format!("Failed to set read timeout: {e}")))?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn send(&self, addr: &str, message: &Message) -> Result<()> {
        debug!("Sending {} to {addr}", message.command);
        let mut stream = self.open(addr)?;
        write_message(&mut stream, message)?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    fn request(&self, addr: &str, message: &Message) -> Result<Option<Message>> {
        debug!("Sending {} to {addr}, awaiting reply", message.command);
        let mut stream = self.open(addr)?;
        write_message(&mut stream, message)?;

        let reply = match read_message(&mut stream) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("No reply from {addr}: {e}");
                None
            }
        };
        let _ = stream.shutdown(Shutdown::Both);
        Ok(reply)
    }
}
