use log::{debug, info, trace};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::signal::ShutdownFlag;
use crate::source::{Packet, PacketSource, SourceError};

/// How long a read blocks before the shutdown flag is checked again.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const MAX_DATAGRAM_SIZE: usize = 65535;

/// Receives export packets directly on a local UDP port.
pub struct UdpListener {
    socket: UdpSocket,
    addr: SocketAddr,
    host: Option<IpAddr>,
    shutdown: ShutdownFlag,
    buf: Vec<u8>,
}

impl UdpListener {
    pub fn bind(addr: SocketAddr, host: Option<IpAddr>, shutdown: ShutdownFlag) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).map_err(|source| SourceError::Bind { addr, source })?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let addr = socket.local_addr()?;
        info!("Listening on {}", addr);

        Ok(UdpListener { socket, addr, host, shutdown, buf: vec![0; MAX_DATAGRAM_SIZE] })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PacketSource for UdpListener {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            if self.shutdown.is_triggered() {
                info!("Closing UDP socket on {}", self.addr);
                return Ok(None);
            }

            let (received_bytes, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
                Err(e) => return Err(e.into()),
            };
            trace!("Received {} bytes from {}", received_bytes, from);

            if let Some(host) = self.host {
                if from.ip() != host {
                    debug!("Ignoring {} bytes from {}, not the filtered host", received_bytes, from);
                    continue;
                }
            }

            return Ok(Some(Packet { source: from.ip(), timestamp: unix_now(), payload: self.buf[..received_bytes].to_vec() }));
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
