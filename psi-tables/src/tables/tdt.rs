//! TDT (Time and Date Table) and TOT (Time Offset Table).
//!
//! Both are short-form sections on PID 0x0014 carrying the current UTC
//! time. They keep version 0 forever, so every received section is
//! delivered. The TOT adds a descriptor loop (local time offsets) and a
//! CRC-32 of its own at the end of the payload.

use bytes::{Buf, BufMut, Bytes};
use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use super::{check_sections, ensure, length_field, read_descriptor_loop, table_id};
use crate::config::clamp_section_size;
use crate::crc32::crc32_mpeg2;
use crate::descriptor::{write_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, CRC_SIZE, PSI_MAX_SECTION_SIZE, SHORT_HEADER_SIZE};
use crate::time::mjd_utc_to_datetime;

/// Parsed TDT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdtTable {
    /// UTC time, 16-bit MJD + 24-bit BCD.
    pub utc_time: u64,
}

impl TdtTable {
    pub fn utc(&self) -> Option<NaiveDateTime> {
        mjd_utc_to_datetime(self.utc_time)
    }
}

impl PsiTable for TdtTable {
    const NAME: &'static str = "TDT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;
    const SUPPRESS_DUPLICATES: bool = false;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::TDT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;
        let mut buf = first.payload();
        ensure(buf, 5)?;
        Ok(TdtTable {
            utc_time: buf.get_uint(5),
        })
    }

    fn encode(&self, _max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let mut payload = [0u8; 5];
        (&mut payload[..]).put_uint(self.utc_time & 0xFF_FFFF_FFFF, 5);
        let header = SectionHeader::short(table_id::TDT).with_private(true);
        Ok(vec![RawSection::build(&header, &payload)?])
    }
}

/// Parsed TOT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotTable {
    /// UTC time, 16-bit MJD + 24-bit BCD.
    pub utc_time: u64,
    /// Descriptors (local time offset).
    pub descriptors: Vec<Descriptor>,
}

impl TotTable {
    pub fn utc(&self) -> Option<NaiveDateTime> {
        mjd_utc_to_datetime(self.utc_time)
    }
}

impl PsiTable for TotTable {
    const NAME: &'static str = "TOT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;
    const SUPPRESS_DUPLICATES: bool = false;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::TOT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        // CRC sits inside the short-form payload
        if crc32_mpeg2(first.as_bytes()) != 0 {
            let data = first.as_bytes();
            let tail = &data[data.len().saturating_sub(CRC_SIZE)..];
            let mut crc = [0u8; 4];
            crc[4 - tail.len()..].copy_from_slice(tail);
            return Err(PsiError::CrcMismatch {
                crc: u32::from_be_bytes(crc),
            });
        }

        let payload = first.payload();
        ensure(payload, 5 + 2 + CRC_SIZE)?;
        let mut buf = &payload[..payload.len() - CRC_SIZE];
        let utc_time = buf.get_uint(5);
        let descriptors = read_descriptor_loop(&mut buf)?;

        Ok(TotTable {
            utc_time,
            descriptors,
        })
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let room = max_section_size.saturating_sub(SHORT_HEADER_SIZE + 5 + 2 + CRC_SIZE);
        let mut kept = 0;
        let mut len = 0;
        for descriptor in &self.descriptors {
            if len + descriptor.encoded_len() > room.min(0x0FFF) {
                break;
            }
            len += descriptor.encoded_len();
            kept += 1;
        }
        if kept < self.descriptors.len() {
            warn!(
                "TOT: descriptors truncated ({} of {} kept)",
                kept,
                self.descriptors.len()
            );
        }

        let section_length = 5 + 2 + len + CRC_SIZE;
        let total = SHORT_HEADER_SIZE + section_length;
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(total)
            .map_err(|_| PsiError::AllocationFailure(total))?;

        buf.put_u8(table_id::TOT);
        buf.put_u16(0x7000 | section_length as u16);
        buf.put_uint(self.utc_time & 0xFF_FFFF_FFFF, 5);
        buf.put_u16(length_field(len));
        write_descriptor_loop(&mut buf, &self.descriptors[..kept]);
        let crc = crc32_mpeg2(&buf);
        buf.put_u32(crc);

        Ok(vec![RawSection::from_bytes(Bytes::from(buf))?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reassembly::TableReassembler;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_tdt() {
        let data = [0x70, 0x70, 0x05, 0xC0, 0x79, 0x12, 0x45, 0x00];
        let section = RawSection::parse(&data).unwrap();

        let tdt = TdtTable::decode(&[section]).unwrap();
        assert_eq!(tdt.utc_time, 0xC0_7912_4500);
        assert_eq!(
            tdt.utc(),
            NaiveDate::from_ymd_opt(1993, 10, 13).unwrap().and_hms_opt(12, 45, 0)
        );
        assert_eq!(tdt.encode(1024).unwrap()[0].as_bytes().as_ref(), &data);
    }

    #[test]
    fn test_tdt_never_suppressed() {
        let mut reassembler = TableReassembler::<TdtTable>::new();
        let tick = TdtTable {
            utc_time: 0xC0_7912_4500,
        };
        let section = tick.encode(1024).unwrap().remove(0);

        assert_eq!(reassembler.push(section.clone()), Some(tick));
        assert_eq!(reassembler.push(section), Some(tick));
    }

    #[test]
    fn test_tot_roundtrip() {
        let tot = TotTable {
            utc_time: 0xE4F2_0930_00,
            descriptors: vec![Descriptor::new(
                0x58,
                vec![b'J', b'P', b'N', 0x03, 0x09, 0x00, 0xE4, 0xF2, 0x00, 0x00, 0x00, 0x09, 0x00],
            )],
        };

        let sections = tot.encode(1024).unwrap();
        assert_eq!(sections.len(), 1);
        let section = RawSection::parse(sections[0].as_bytes()).unwrap();
        assert!(!section.header.syntax_indicator);
        assert_eq!(section.header.table_id, table_id::TOT);
        assert_eq!(TotTable::decode(&[section]).unwrap(), tot);
    }

    #[test]
    fn test_tot_bad_crc() {
        let tot = TotTable {
            utc_time: 0xE4F2_0930_00,
            descriptors: Vec::new(),
        };
        let mut data = tot.encode(1024).unwrap()[0].as_bytes().to_vec();
        data[4] ^= 0x01;
        let section = RawSection::parse(&data).unwrap();

        // the framer cannot see the CRC of a short-form section
        assert!(section.is_crc_valid());
        assert!(matches!(
            TotTable::decode(&[section]),
            Err(PsiError::CrcMismatch { .. })
        ));
    }
}
