//! PSI section framing.
//!
//! This module handles the common PSI section header, the optional
//! extended ("long form") header and the CRC-32 trailer. It knows nothing
//! about table semantics; everything between the headers and the CRC is an
//! opaque payload.
//!
//! ```text
//! +----------+-----+-----+----+--------+-----------+------------+---------+----------+--------+
//! | table_id | SSI | PI  | rs | length | extension | rs|ver|c/n | sec_num | last_sec | ...    |
//! |    8     |  1  |  1  | 2  |   12   |    16     |  2| 5 | 1  |    8    |    8     | CRC 32 |
//! +----------+-----+-----+----+--------+-----------+------------+---------+----------+--------+
//! ```

use std::ops::Range;

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::crc32::crc32_mpeg2;
use crate::demux::SubtableKey;
use crate::error::PsiError;

/// Size of the common section header (table_id + flags + length).
pub const SHORT_HEADER_SIZE: usize = 3;
/// Size of the common header plus the extended header.
pub const LONG_HEADER_SIZE: usize = 8;
/// Size of the CRC-32 trailer.
pub const CRC_SIZE: usize = 4;
/// Largest value the section_length field may carry.
pub const MAX_SECTION_LENGTH: usize = 4093;
/// Section size limit for MPEG-2 PSI tables (PAT, CAT, PMT) and most DVB SI.
pub const PSI_MAX_SECTION_SIZE: usize = 1024;
/// Section size limit for private sections (EIT, ATSC PSIP).
pub const PRIVATE_MAX_SECTION_SIZE: usize = SHORT_HEADER_SIZE + MAX_SECTION_LENGTH;

/// Header fields common to all PSI sections.
///
/// For sections with `syntax_indicator` clear the extended fields read as
/// `extension = 0`, `version = 0`, `current_next = true` and section
/// numbers 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator (long form with CRC).
    pub syntax_indicator: bool,
    /// Private indicator.
    pub private_indicator: bool,
    /// Table ID extension.
    pub extension: u16,
    /// Version number (5 bits).
    pub version: u8,
    /// Current/next indicator.
    pub current_next: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl SectionHeader {
    /// Header for a long-form section.
    pub fn long(table_id: u8, extension: u16, version: u8, current_next: bool) -> Self {
        Self {
            table_id,
            syntax_indicator: true,
            private_indicator: false,
            extension,
            version: version & 0x1F,
            current_next,
            section_number: 0,
            last_section_number: 0,
        }
    }

    /// Header for a short-form section (no extended header, no CRC).
    pub fn short(table_id: u8) -> Self {
        Self {
            table_id,
            syntax_indicator: false,
            private_indicator: false,
            extension: 0,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
        }
    }

    /// Set the private indicator.
    pub fn with_private(mut self, private_indicator: bool) -> Self {
        self.private_indicator = private_indicator;
        self
    }

    /// Subtable key of this header.
    pub fn key(&self) -> SubtableKey {
        SubtableKey::new(self.table_id, self.extension)
    }

    /// Bytes the framing adds around the payload.
    pub fn overhead(&self) -> usize {
        if self.syntax_indicator {
            LONG_HEADER_SIZE + CRC_SIZE
        } else {
            SHORT_HEADER_SIZE
        }
    }
}

/// One PSI section as received off the wire or produced by a generator.
///
/// The complete section (headers and CRC included) is kept in a shared
/// buffer; the payload is a sub-range of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    /// Section header.
    pub header: SectionHeader,
    data: Bytes,
    payload: Range<usize>,
}

impl RawSection {
    /// Parse a section from the start of `data`, copying it out.
    ///
    /// Bytes after the declared section length are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, PsiError> {
        let total = declared_len(data)?;
        Self::from_bytes(Bytes::copy_from_slice(&data[..total]))
    }

    /// Parse a section from a shared buffer without copying.
    pub fn from_bytes(data: Bytes) -> Result<Self, PsiError> {
        let total = declared_len(&data)?;
        let data = data.slice(..total);

        let table_id = data[0];
        let syntax_indicator = data[1] & 0x80 != 0;
        let private_indicator = data[1] & 0x40 != 0;

        if !syntax_indicator {
            return Ok(RawSection {
                header: SectionHeader::short(table_id).with_private(private_indicator),
                payload: SHORT_HEADER_SIZE..total,
                data,
            });
        }

        if total < LONG_HEADER_SIZE + CRC_SIZE {
            return Err(PsiError::MalformedSection {
                declared: LONG_HEADER_SIZE + CRC_SIZE,
                available: total,
            });
        }

        let header = SectionHeader {
            table_id,
            syntax_indicator,
            private_indicator,
            extension: ((data[3] as u16) << 8) | data[4] as u16,
            version: (data[5] >> 1) & 0x1F,
            current_next: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
        };

        Ok(RawSection {
            header,
            payload: LONG_HEADER_SIZE..total - CRC_SIZE,
            data,
        })
    }

    /// Build a section around `payload`: fills in the length, packs the
    /// extended header and, for long-form sections, appends the CRC.
    pub fn build(header: &SectionHeader, payload: &[u8]) -> Result<Self, PsiError> {
        let overhead = header.overhead() - SHORT_HEADER_SIZE;
        let section_length = overhead + payload.len();
        if section_length > MAX_SECTION_LENGTH {
            return Err(PsiError::SectionTooLong {
                len: SHORT_HEADER_SIZE + section_length,
                max: PRIVATE_MAX_SECTION_SIZE,
            });
        }

        let total = SHORT_HEADER_SIZE + section_length;
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(total)
            .map_err(|_| PsiError::AllocationFailure(total))?;

        buf.put_u8(header.table_id);
        let flags = ((header.syntax_indicator as u16) << 15)
            | ((header.private_indicator as u16) << 14)
            | 0x3000
            | section_length as u16;
        buf.put_u16(flags);

        let payload_start = if header.syntax_indicator {
            buf.put_u16(header.extension);
            buf.put_u8(0xC0 | ((header.version & 0x1F) << 1) | header.current_next as u8);
            buf.put_u8(header.section_number);
            buf.put_u8(header.last_section_number);
            LONG_HEADER_SIZE
        } else {
            SHORT_HEADER_SIZE
        };

        buf.put_slice(payload);
        let payload_end = buf.len();

        if header.syntax_indicator {
            let crc = crc32_mpeg2(&buf);
            buf.put_u32(crc);
        }

        let header = if header.syntax_indicator {
            SectionHeader {
                version: header.version & 0x1F,
                ..*header
            }
        } else {
            SectionHeader::short(header.table_id).with_private(header.private_indicator)
        };

        Ok(RawSection {
            header,
            data: Bytes::from(buf),
            payload: payload_start..payload_end,
        })
    }

    /// Payload bytes (between the headers and the CRC).
    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload.clone()]
    }

    /// The complete section, headers and CRC included.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Total section length including header and CRC.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// CRC-32 trailer, present on long-form sections only.
    pub fn crc32(&self) -> Option<u32> {
        if !self.header.syntax_indicator {
            return None;
        }
        let tail = &self.data[self.data.len() - CRC_SIZE..];
        Some(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]))
    }

    /// Subtable key of this section.
    pub fn key(&self) -> SubtableKey {
        self.header.key()
    }

    /// Check the CRC. Short-form sections carry none and are always valid.
    pub fn is_crc_valid(&self) -> bool {
        !self.header.syntax_indicator || crc32_mpeg2(&self.data) == 0
    }

    /// Like [`is_crc_valid`](Self::is_crc_valid) but as a `Result`.
    pub fn verify_crc(&self) -> Result<(), PsiError> {
        if self.is_crc_valid() {
            Ok(())
        } else {
            Err(PsiError::CrcMismatch {
                crc: self.crc32().unwrap_or_default(),
            })
        }
    }
}

/// Read the 12-bit length and check it against the buffer.
fn declared_len(data: &[u8]) -> Result<usize, PsiError> {
    if data.len() < SHORT_HEADER_SIZE {
        return Err(PsiError::MalformedSection {
            declared: SHORT_HEADER_SIZE,
            available: data.len(),
        });
    }

    let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
    let total = SHORT_HEADER_SIZE + section_length;
    if total > data.len() {
        return Err(PsiError::MalformedSection {
            declared: total,
            available: data.len(),
        });
    }

    Ok(total)
}

/// Iterator over back-to-back sections in one buffer.
///
/// Stops at the end of the buffer or at `0xFF` stuffing. A framing error
/// is yielded once and ends the walk, since the next section boundary is
/// unknown after it.
#[derive(Debug, Clone)]
pub struct SectionIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> SectionIter<'a> {
    /// Walk the sections in `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: false,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for SectionIter<'a> {
    type Item = Result<RawSection, PsiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.data[self.offset..];
        if rest.is_empty() || rest[0] == 0xFF {
            self.done = true;
            return None;
        }

        match RawSection::parse(rest) {
            Ok(section) => {
                self.offset += section.total_len();
                Some(Ok(section))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
