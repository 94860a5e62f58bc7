use serde_derive::Deserialize;
use std::fmt;

use crate::flow::{read_header, DecodeError};

pub const VERSION: u16 = 5;

/// Every v5 flow record is 48 bytes, `count` of them follow the header.
pub const RECORD_SIZE: usize = 48;

/******************************** MSG HEADER ********************************/

/// from https://www.cisco.com/c/en/us/td/docs/net_mgmt/netflow_collection_engine/3-6/user/guide/format.html#wp1006108
#[derive(Deserialize, Debug)]
pub struct Header {
    pub version: u16,    // NetFlow export format version number
    pub count: u16,      // Number of flows exported in this packet (1-30)
    pub uptime: u32,     // Current time in milliseconds since the export device booted
    pub unix_secs: u32,  // Current count of seconds since 0000 UTC 1970
    pub unix_nsecs: u32, // Residual nanoseconds since 0000 UTC 1970
    pub seq_number: u32, // Sequence counter of total flows seen
    pub engine_type: u8, // Type of flow-switching engine
    pub engine_id: u8,   // Slot number of the flow-switching engine
    sampl: u16,          // First two bits hold the sampling mode; remaining 14 bits hold value of sampling interval
}

impl Header {
    pub const SIZE: usize = 24;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        read_header(buf, Self::SIZE, "NetFlow v5")
    }

    #[inline]
    pub fn sampl_mode(&self) -> u16 {
        self.sampl >> 14
    }

    #[inline]
    pub fn sampl_interval(&self) -> u16 {
        self.sampl & 0b0011_1111_1111_1111
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "version: {}, count: {}, uptime: {}ms, unix_secs: {}s, unix_nsecs: {}ns, seq_number: {}, engine_type: {}, engine_id: {}, sampl_mode: {}, sampl_interval: {}",
            self.version,
            self.count,
            self.uptime,
            self.unix_secs,
            self.unix_nsecs,
            self.seq_number,
            self.engine_type,
            self.engine_id,
            self.sampl_mode(),
            self.sampl_interval()
        )
    }
}
