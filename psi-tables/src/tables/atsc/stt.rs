//! STT (System Time Table).
//!
//! Carries GPS time and the GPS-UTC offset. Every STT has the same
//! version, so repeats are always delivered.

use bytes::{Buf, BufMut};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::tables::{check_sections, ensure, table_id};
use crate::time::gps_to_utc;

/// Parsed STT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SttTable {
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Protocol version.
    pub protocol_version: u8,
    /// Seconds since 1980-01-06 00:00:00 GPS.
    pub system_time: u32,
    /// Leap seconds between GPS and UTC.
    pub gps_utc_offset: u8,
    /// Daylight saving status, day and hour.
    pub daylight_saving: u16,
    /// Descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl SttTable {
    /// Current time as UTC.
    pub fn utc(&self) -> Option<NaiveDateTime> {
        gps_to_utc(self.system_time, self.gps_utc_offset)
    }

    /// DS_status bit.
    pub fn in_daylight_saving(&self) -> bool {
        self.daylight_saving & 0x8000 != 0
    }
}

impl PsiTable for SttTable {
    const NAME: &'static str = "STT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;
    const SUPPRESS_DUPLICATES: bool = false;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::ATSC_STT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;
        let mut buf = first.payload();
        ensure(buf, 8)?;

        let protocol_version = buf.get_u8();
        let system_time = buf.get_u32();
        let gps_utc_offset = buf.get_u8();
        let daylight_saving = buf.get_u16();

        let mut descriptors = parse_descriptor_loop(buf)?;
        for section in &sections[1..] {
            let payload = section.payload();
            ensure(payload, 8)?;
            descriptors.extend(parse_descriptor_loop(&payload[8..])?);
        }

        Ok(SttTable {
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            protocol_version,
            system_time,
            gps_utc_offset,
            daylight_saving,
            descriptors,
        })
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::ATSC_STT,
            0x0000,
            self.version_number,
            self.current_next_indicator,
        )
        .with_private(true);
        let mut prefix = Vec::with_capacity(8);
        prefix.put_u8(self.protocol_version);
        prefix.put_u32(self.system_time);
        prefix.put_u8(self.gps_utc_offset);
        prefix.put_u16(self.daylight_saving);

        let mut chain = SectionChain::new(header, max_section_size).with_prefix(&prefix);
        chain.push_descriptors(&self.descriptors)?;
        chain.finish()
    }
}
