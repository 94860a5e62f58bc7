use bincode::Options;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

pub mod ipfix;
pub mod netflow5;
pub mod netflow9;

/// Reasons an export payload is not accounted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not enough space in buffer to read the {kind} header, required {required} but received {received}")]
    TruncatedHeader { kind: &'static str, required: usize, received: usize },

    #[error("unsupported export version {0}, expected 5, 9 or 10")]
    UnsupportedVersion(u16),

    #[error("malformed IPFIX set at body offset {offset}: {reason}")]
    MalformedIpfixSet { offset: usize, reason: String },
}

/// Decode a fixed size, big endian header after checking the buffer really holds it.
pub(crate) fn read_header<T: DeserializeOwned>(buf: &[u8], size: usize, kind: &'static str) -> Result<T, DecodeError> {
    let truncated = || DecodeError::TruncatedHeader { kind, required: size, received: buf.len() };

    if buf.len() < size {
        return Err(truncated());
    }

    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_big_endian()
        .deserialize(&buf[..size])
        .map_err(|_| truncated())
}

/// Export protocol version, as carried in the first two bytes of every export packet.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Version {
    NetflowV5 = netflow5::VERSION,
    NetflowV9 = netflow9::VERSION,
    Ipfix = ipfix::VERSION,
}

impl Version {
    pub const TAG_SIZE: usize = 2;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::TAG_SIZE {
            return Err(DecodeError::TruncatedHeader { kind: "version tag", required: Self::TAG_SIZE, received: buf.len() });
        }

        let tag = BigEndian::read_u16(&buf[0..2]);
        FromPrimitive::from_u16(tag).ok_or(DecodeError::UnsupportedVersion(tag))
    }

    pub fn label(self) -> &'static str {
        match self {
            Version::NetflowV5 => "v5",
            Version::NetflowV9 => "v9",
            Version::Ipfix => "IPFIX",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Fixed header of an export packet, one variant per supported version.
#[derive(Debug)]
pub enum ExportHeader {
    V5(netflow5::Header),
    V9(netflow9::Header),
    Ipfix(ipfix::Header),
}

impl ExportHeader {
    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(match Version::read(buf)? {
            Version::NetflowV5 => ExportHeader::V5(netflow5::Header::read(buf)?),
            Version::NetflowV9 => ExportHeader::V9(netflow9::Header::read(buf)?),
            Version::Ipfix => ExportHeader::Ipfix(ipfix::Header::read(buf)?),
        })
    }

    pub fn version(&self) -> Version {
        match self {
            ExportHeader::V5(_) => Version::NetflowV5,
            ExportHeader::V9(_) => Version::NetflowV9,
            ExportHeader::Ipfix(_) => Version::Ipfix,
        }
    }

    pub fn sequence(&self) -> u32 {
        match self {
            ExportHeader::V5(h) => h.seq_number,
            ExportHeader::V9(h) => h.seq_number,
            ExportHeader::Ipfix(h) => h.seq_number,
        }
    }

    /// NetFlow v5 has no source id, every v5 exporter reports under id 0.
    pub fn exporter_id(&self) -> u32 {
        match self {
            ExportHeader::V5(_) => 0,
            ExportHeader::V9(h) => h.source_id,
            ExportHeader::Ipfix(h) => h.domain_id,
        }
    }
}

impl fmt::Display for ExportHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExportHeader::V5(h) => write!(f, "NetFlow v5 {}", h),
            ExportHeader::V9(h) => write!(f, "NetFlow v9 {}", h),
            ExportHeader::Ipfix(h) => write!(f, "IPFIX {}", h),
        }
    }
}

/// What the loss accounting needs to know about one export packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportPacket {
    pub version: Version,
    pub sequence: u32,
    pub exporter_id: u32,
    pub flow_count: u32,
}

pub struct Decoder {
    templates: ipfix::TemplateTracker,
    ipfix_as_v9: bool,
}

impl Decoder {
    /// With `ipfix_as_v9` set, IPFIX messages count as a single flow each and templates are never learned.
    pub fn new(ipfix_as_v9: bool) -> Self {
        Decoder { templates: ipfix::TemplateTracker::new(), ipfix_as_v9 }
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<ExportPacket, DecodeError> {
        let header = ExportHeader::read(payload)?;
        trace!("{}", header);

        let flow_count = match &header {
            ExportHeader::V5(h) => {
                let announced = netflow5::Header::SIZE + h.count as usize * netflow5::RECORD_SIZE;
                if payload.len() < announced {
                    debug!("NetFlow v5 packet announces {} records but only carries {} bytes", h.count, payload.len());
                }
                h.count as u32
            }
            ExportHeader::V9(_) => 1,
            ExportHeader::Ipfix(_) if self.ipfix_as_v9 => 1,
            ExportHeader::Ipfix(h) => self.templates.learn_and_count(h.body(payload))?,
        };

        Ok(ExportPacket { version: header.version(), sequence: header.sequence(), exporter_id: header.exporter_id(), flow_count })
    }

    #[cfg(test)]
    pub fn templates(&self) -> &ipfix::TemplateTracker {
        &self.templates
    }
}
