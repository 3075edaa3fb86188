//! UDP socket layer sending and receiving bencoded DHT messages.

pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::trace;

use crate::common::Message;
use crate::Result;

use super::config::Config;
use udp::Udp;

/// Port tried first when no port is configured.
pub const DEFAULT_PORT: u16 = 4444;
/// Deadline for writing one outbound datagram.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// How long [KrpcSocket::recv_from] blocks before giving the caller a chance to do other work.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Largest possible UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// A UDP socket wrapper that encodes outbound DHT messages.
#[derive(Debug)]
pub struct KrpcSocket {
    socket: Box<dyn Udp>,
    local_addr: SocketAddr,
}

impl KrpcSocket {
    /// Bind a real UDP socket according to the [Config].
    ///
    /// Without an explicit port, [DEFAULT_PORT] is tried first, then any free port.
    pub fn bind(config: &Config) -> Result<Self> {
        let socket = match config.port {
            Some(port) => udp::real::UdpSocket::bind(SocketAddr::new(config.bind_address, port))?,
            None => match udp::real::UdpSocket::bind(SocketAddr::new(
                config.bind_address,
                DEFAULT_PORT,
            )) {
                Ok(socket) => socket,
                Err(_) => udp::real::UdpSocket::bind(SocketAddr::new(config.bind_address, 0))?,
            },
        };

        Self::new(socket, config.write_timeout)
    }

    /// Wrap any [Udp] implementation.
    pub fn new(socket: Box<dyn Udp>, write_timeout: Duration) -> Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        socket.set_write_timeout(Some(write_timeout))?;

        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }

    // === Getters ===

    /// Returns the address the socket is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // === Public Methods ===

    /// Encode a message and write it as a single datagram.
    ///
    /// Failures are returned to the caller and never retried.
    pub fn send(&self, address: SocketAddr, message: &Message) -> Result<()> {
        let bytes = message.to_bytes()?;

        self.socket.send_to(&bytes, address)?;

        trace!(
            context = "socket_message_sending",
            tid = %message.transaction_id.short(),
            to = ?address,
            message = %message.describe(),
        );

        Ok(())
    }

    /// Receive a single datagram.
    ///
    /// Returns `None` if nothing arrived within [READ_TIMEOUT], or if the socket failed.
    pub fn recv_from(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        match self.socket.recv_from(buf) {
            Ok((_, from)) if from.port() == 0 => {
                trace!(
                    context = "socket_validation",
                    message = "Datagram from port 0"
                );
                None
            }
            Ok(received) => Some(received),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                None
            }
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
                None
            }
        }
    }
}
