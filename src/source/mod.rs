use pcap_file::{DataLink, PcapError};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

pub mod capture;
#[cfg(feature = "live-capture")]
pub mod interface;
pub mod listener;

/// One export datagram, stripped down to its UDP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: IpAddr,
    /// Arrival time, seconds since the UNIX epoch.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to bind udp socket to {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to open capture file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to capture on interface {name}: {reason}")]
    Interface { name: String, reason: String },

    #[error("unsupported capture link type {0:?}")]
    LinkType(DataLink),

    #[error("invalid capture file: {0}")]
    Pcap(#[from] PcapError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub trait PacketSource {
    /// Blocks until the next export packet. `Ok(None)` means the input is
    /// exhausted or a shutdown was requested.
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError>;
}

/// Which UDP datagrams are export traffic, in the spirit of a `udp port P and host H` capture filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub port: u16,
    pub host: Option<IpAddr>,
}

impl Filter {
    pub fn matches(&self, src: SocketAddr, dst: SocketAddr) -> bool {
        let port = src.port() == self.port || dst.port() == self.port;
        let host = self.host.map_or(true, |host| src.ip() == host || dst.ip() == host);
        port && host
    }

    /// The same selection as a BPF program, for capture handles that filter in the kernel.
    #[cfg(any(feature = "live-capture", test))]
    pub fn bpf_program(&self) -> String {
        match self.host {
            Some(host) => format!("udp port {} and host {}", self.port, host),
            None => format!("udp port {}", self.port),
        }
    }
}
