use serde_derive::Deserialize;
use std::fmt;

use crate::flow::{read_header, DecodeError};

pub const VERSION: u16 = 9;

/******************************** MSG HEADER ********************************/

/// from https://www.ietf.org/rfc/rfc3954.txt
/// ```
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Count              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           sysUpTime                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           UNIX Secs                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Source ID                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The v9 sequence number counts export packets, not flow records, so loss for
/// v9 exporters is measured in packets.
#[derive(Deserialize, Debug)]
pub struct Header {
    pub version: u16,    // Version of Flow Record format exported in this packet
    pub count: u16,      // Total number of records in the Export Packet, templates included
    pub uptime: u32,     // Time in milliseconds since this device was first booted
    pub unix_secs: u32,  // Time in seconds since 0000 UTC 1970, at which the Export Packet leaves the Exporter
    pub seq_number: u32, // Incremental sequence counter of all Export Packets sent from the current Observation Domain
    pub source_id: u32,  // Identifies the Exporter Observation Domain
}

impl Header {
    pub const SIZE: usize = 20;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        read_header(buf, Self::SIZE, "NetFlow v9")
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "version: {}, count: {}, uptime: {}ms, unix_secs: {}s, seq_number: {}, source_id: {}",
            self.version, self.count, self.uptime, self.unix_secs, self.seq_number, self.source_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const HEADER_PAYLOD: [u8; Header::SIZE] = hex!(
        "00 09 00 03 00 01 e2 40 60 80 b8 9c 00 00 01 2c
         00 00 00 07"
    );

    #[test]
    fn read_msg_header() {
        let header = Header::read(&HEADER_PAYLOD).unwrap();

        assert_eq!(header.version, VERSION);
        assert_eq!(header.count, 3);
        assert_eq!(header.uptime, 123456);
        assert_eq!(header.unix_secs, 1619048604);
        assert_eq!(header.seq_number, 300);
        assert_eq!(header.source_id, 7);
    }

    #[test]
    fn display_msg_header() {
        let header = Header::read(&HEADER_PAYLOD).unwrap();

        assert_eq!(
            header.to_string(),
            "version: 9, count: 3, uptime: 123456ms, unix_secs: 1619048604s, seq_number: 300, source_id: 7"
        );
    }

    #[test]
    #[should_panic]
    fn read_invalid_msg_header() {
        Header::read(&HEADER_PAYLOD[0..Header::SIZE - 1]).unwrap();
    }
}
