use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::protocol::{FrameParser, UdpDatagramParser, UDP_BUFFER_LEN};
use crate::source::{Received, Source};
use crate::types::SourceKind;
use crate::{PosefeedError, Result};

/// Position + orientation datagrams from a companion tracking process.
pub struct UdpSource {
    socket: UdpSocket,
    local_addr: SocketAddr,
    buf: [u8; UDP_BUFFER_LEN],
    echo: bool,
    parser: UdpDatagramParser,
}

impl UdpSource {
    /// Bind `0.0.0.0:port`. Port 0 picks an ephemeral port.
    pub fn bind(port: u16, read_timeout: Duration, echo: bool) -> Result<UdpSource> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = UdpSocket::bind(addr).map_err(|source| PosefeedError::Bind { addr, source })?;
        Self::from_socket(socket, read_timeout, echo)
    }

    /// Use an already-bound socket.
    pub fn from_socket(socket: UdpSocket, read_timeout: Duration, echo: bool) -> Result<UdpSource> {
        socket.set_read_timeout(Some(read_timeout))?;
        let local_addr = socket.local_addr()?;
        log::info!("UDP source listening on {}", local_addr);

        Ok(UdpSource {
            socket,
            local_addr,
            buf: [0u8; UDP_BUFFER_LEN],
            echo,
            parser: UdpDatagramParser,
        })
    }
}

impl Source for UdpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Udp
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn recv(&mut self) -> Result<Received> {
        let (len, peer) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(Received::Idle)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(Received::Idle),
            // Windows reports an ICMP port-unreachable from a previous echo
            // as a receive error on the next call.
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                log::debug!("Ignoring UDP connection reset: {}", e);
                return Ok(Received::Idle);
            }
            Err(e) => return Err(PosefeedError::Io(e)),
        };

        let payload = &self.buf[..len];
        log::trace!("UDP {} bytes from {}: {}", len, peer, String::from_utf8_lossy(payload));

        if self.echo {
            if let Err(e) = self.socket.send_to(payload, peer) {
                log::warn!("UDP echo to {} failed: {}", peer, e);
            }
        }

        Ok(match self.parser.parse(payload) {
            Ok(reading) => Received::Reading(reading),
            Err(e) => Received::Rejected(e),
        })
    }

    fn shutdown(&mut self) {
        log::info!("Closing UDP socket {}", self.local_addr);
    }
}
