use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::flow::{read_header, DecodeError};

pub const VERSION: u16 = 10;

/******************************** MSG HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Export Time                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Observation Domain ID                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```

#[derive(Deserialize, Debug)]
pub struct Header {
    pub version: u16,     // Version of IPFIX to which this Message conforms
    pub length: u16,      // Total length of the IPFIX Message, measured in octets, including Message Header and Set(s).
    pub export_time: u32, // Time at which the IPFIX Message Header leaves the Exporter expressed in seconds since the UNIX epoch
    pub seq_number: u32,  // Incremental sequence counter modulo 2^32 of all IPFIX Data Record sent in the current stream from the current Observation Domain by the Exporting Process.
    pub domain_id: u32,   // Identifier used to uniquely identify to the Collecting Process the Observation Domain that metered the Flows
}

impl Header {
    pub const SIZE: usize = 16;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        read_header(buf, Self::SIZE, "IPFIX")
    }

    /// Sets following the header, bounded by both the announced length and what was actually captured.
    pub fn body<'a>(&self, msg: &'a [u8]) -> &'a [u8] {
        let end = (self.length as usize).min(msg.len());
        if end < msg.len() {
            trace!("IPFIX message carries {} bytes past its announced length {}", msg.len() - end, self.length);
        }

        if end <= Self::SIZE {
            &[]
        } else {
            &msg[Self::SIZE..end]
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "version: {}, length: {}, export_time: {}s, seq_number: {}, domain_id: {}",
            self.version, self.length, self.export_time, self.seq_number, self.domain_id
        )
    }
}

/******************************** SET HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```

#[derive(Debug)]
pub struct SetHeader {
    pub id: u16,     // Identifies the Set.
    pub length: u16, // Total length of the Set, in octets, including the Set Header, all records, and the optional padding
}

impl SetHeader {
    pub const SIZE: usize = 4;
    pub const TEMPLATE_SET_ID: u16 = 2;
    pub const MIN_DATA_SET_ID: u16 = 256;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read IPFIX SetHeader, required {} but received {}", Self::SIZE, buf.len()));
        }

        Ok(SetHeader {
            id: BigEndian::read_u16(&buf[0..2]),
            length: BigEndian::read_u16(&buf[2..4]),
        })
    }
}

/******************************** TEMPLATE HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Template ID (> 255)      |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```

#[derive(Debug)]
pub struct TemplateHeader {
    pub id: u16,          // Each Template Record is given a unique Template ID in the range 256 to 65535
    pub field_count: u16, // Number of fields in this Template Record, 0 withdraws the template
}

impl TemplateHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read IPFIX TemplateHeader, required {} but received {}", Self::SIZE, buf.len()));
        }

        Ok(TemplateHeader {
            id: BigEndian::read_u16(&buf[0..2]),
            field_count: BigEndian::read_u16(&buf[2..4]),
        })
    }
}

/********************************  TEMPLATE RECORD FIELD ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|  Information Element ident. |        Field Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Enterprise Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The Enterprise Number is only present when the E bit is set.

#[derive(Debug, PartialEq)]
pub struct TemplateField {
    pub id: u16,                 // Information Element identifier, E bit stripped
    pub length: u16,             // The length of the corresponding encoded Information Element, in octets
    pub enterprise: Option<u32>, // IANA enterprise number of an enterprise-specific Information Element
}

impl TemplateField {
    pub const SIZE: usize = 4;
    pub const ENTERPRISE_SIZE: usize = 8;
    pub const ENTERPRISE_BIT: u16 = 0x8000;
    pub const VARIABLE_LENGTH: u16 = 0xFFFF;

    pub fn read(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < Self::SIZE {
            return Err(format!("Not enough space in buffer to read IPFIX TemplateField, required {} but received {}", Self::SIZE, buf.len()));
        }

        let id = BigEndian::read_u16(&buf[0..2]);
        let length = BigEndian::read_u16(&buf[2..4]);

        if id & Self::ENTERPRISE_BIT == 0 {
            return Ok(TemplateField { id, length, enterprise: None });
        }

        if buf.len() < Self::ENTERPRISE_SIZE {
            return Err(format!(
                "Not enough space in buffer to read IPFIX enterprise TemplateField, required {} but received {}",
                Self::ENTERPRISE_SIZE,
                buf.len()
            ));
        }

        Ok(TemplateField {
            id: id & !Self::ENTERPRISE_BIT,
            length,
            enterprise: Some(BigEndian::read_u32(&buf[4..8])),
        })
    }

    /// Number of bytes this specifier occupies in the Template Record.
    #[inline]
    pub fn size(&self) -> usize {
        if self.enterprise.is_some() {
            Self::ENTERPRISE_SIZE
        } else {
            Self::SIZE
        }
    }
}

/******************************** TEMPLATE TRACKER ********************************/

/// Size of one data record described by a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLength {
    Fixed(usize),
    /// At least one field is variable length, records can't be counted from the set length alone.
    Variable,
}

impl RecordLength {
    fn add(self, field_length: u16) -> Self {
        match self {
            _ if field_length == TemplateField::VARIABLE_LENGTH => RecordLength::Variable,
            RecordLength::Fixed(length) => RecordLength::Fixed(length + field_length as usize),
            RecordLength::Variable => RecordLength::Variable,
        }
    }
}

impl fmt::Display for RecordLength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordLength::Fixed(length) => write!(f, "{} bytes", length),
            RecordLength::Variable => write!(f, "variable"),
        }
    }
}

/// Learns record layouts from Template Sets and counts the records of Data Sets.
///
/// Templates are keyed by id only and live for the whole process, a later
/// definition of the same id replaces the earlier one.
#[derive(Debug, Default)]
pub struct TemplateTracker {
    templates: HashMap<u16, RecordLength>,
}

impl TemplateTracker {
    pub fn new() -> Self {
        TemplateTracker::default()
    }

    /// Walks the sets of an IPFIX message body, learning every template and
    /// returning the number of data records found.
    ///
    /// A malformed set aborts the whole message. Templates learned from the
    /// sets preceding it are kept.
    pub fn learn_and_count(&mut self, body: &[u8]) -> Result<u32, DecodeError> {
        let mut flows = 0u32;
        let mut offset = 0;

        while offset < body.len() {
            let malformed = |reason: String| DecodeError::MalformedIpfixSet { offset, reason };

            let set = SetHeader::read(&body[offset..]).map_err(malformed)?;
            let length = set.length as usize;

            if length < SetHeader::SIZE {
                return Err(malformed(format!("set {} announces length {}, shorter than its header", set.id, length)));
            }
            if length > body.len() - offset {
                return Err(malformed(format!("set {} announces length {} but only {} bytes remain", set.id, length, body.len() - offset)));
            }

            let content = &body[offset + SetHeader::SIZE..offset + length];
            match set.id {
                SetHeader::TEMPLATE_SET_ID => self.learn_templates(content).map_err(malformed)?,
                id if id >= SetHeader::MIN_DATA_SET_ID => flows += self.count_records(id, content.len()),
                id => trace!("Skipping IPFIX set {} of {} bytes", id, length),
            }

            offset += length;
        }

        Ok(flows)
    }

    #[cfg(test)]
    pub fn record_length(&self, template_id: u16) -> Option<RecordLength> {
        self.templates.get(&template_id).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn learn_templates(&mut self, content: &[u8]) -> Result<(), String> {
        let mut offset = 0;

        // anything shorter than a template header is set padding
        while content.len() - offset >= TemplateHeader::SIZE {
            let header = TemplateHeader::read(&content[offset..])?;
            offset += TemplateHeader::SIZE;

            if header.field_count == 0 {
                self.withdraw(header.id);
                continue;
            }

            let mut length = RecordLength::Fixed(0);
            for _ in 0..header.field_count {
                let field = TemplateField::read(&content[offset..])?;
                length = length.add(field.length);
                offset += field.size();
            }

            debug!("Learned IPFIX template {} with {} fields, record length {}", header.id, header.field_count, length);
            self.templates.insert(header.id, length);
        }

        Ok(())
    }

    fn withdraw(&mut self, template_id: u16) {
        if template_id == SetHeader::TEMPLATE_SET_ID {
            debug!("Withdrawing all {} IPFIX templates", self.templates.len());
            self.templates.clear();
        } else if self.templates.remove(&template_id).is_some() {
            debug!("Withdrawing IPFIX template {}", template_id);
        }
    }

    fn count_records(&self, template_id: u16, content_size: usize) -> u32 {
        match self.templates.get(&template_id) {
            Some(RecordLength::Fixed(length)) if *length > 0 => (content_size / length) as u32,
            Some(RecordLength::Fixed(_)) => 0,
            Some(RecordLength::Variable) => {
                trace!("Data set {} uses a variable length template, not counted", template_id);
                0
            }
            None => {
                debug!("No template {} learned yet, data set not counted", template_id);
                0
            }
        }
    }
}
