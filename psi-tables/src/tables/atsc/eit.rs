//! ATSC EIT (Event Information Table), keyed by source_id.

use bytes::{Buf, BufMut};
use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use super::protocol_version;
use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::{LoopLayout, SectionChain};
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::tables::{check_sections, ensure, table_id, take};
use crate::time::gps_to_utc;

/// One event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtscEitEvent {
    /// Event ID (14 bits).
    pub event_id: u16,
    /// Start time in GPS seconds.
    pub start_time: u32,
    /// ETM location (2 bits).
    pub etm_location: u8,
    /// Length in seconds (20 bits).
    pub length_in_seconds: u32,
    /// Title as a multiple string structure, kept raw.
    pub title_text: Vec<u8>,
    /// Event descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl AtscEitEvent {
    /// Start time as UTC given the STT's GPS-UTC offset.
    pub fn start_time_utc(&self, gps_utc_offset: u8) -> Option<NaiveDateTime> {
        gps_to_utc(self.start_time, gps_utc_offset)
    }
}

/// Parsed ATSC EIT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtscEitTable {
    /// Source ID of the virtual channel.
    pub source_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Protocol version.
    pub protocol_version: u8,
    /// Events.
    pub events: Vec<AtscEitEvent>,
}

impl PsiTable for AtscEitTable {
    const NAME: &'static str = "ATSC EIT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::ATSC_EIT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut eit = AtscEitTable {
            source_id: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            protocol_version: protocol_version(first)?,
            events: Vec::new(),
        };

        for section in sections {
            let mut buf = section.payload();
            ensure(buf, 2)?;
            buf.advance(1);
            let num_events_in_section = buf.get_u8();

            for _ in 0..num_events_in_section {
                ensure(buf, 10)?;
                let event_id = buf.get_u16() & 0x3FFF;
                let start_time = buf.get_u32();
                let length = buf.get_uint(3) as u32;
                let title_length = buf.get_u8() as usize;
                let title_text = take(&mut buf, title_length)?.to_vec();

                ensure(buf, 2)?;
                let descriptors_length = (buf.get_u16() & 0x0FFF) as usize;

                eit.events.push(AtscEitEvent {
                    event_id,
                    start_time,
                    etm_location: ((length >> 20) & 0x03) as u8,
                    length_in_seconds: length & 0x0F_FFFF,
                    title_text,
                    descriptors: parse_descriptor_loop(take(&mut buf, descriptors_length)?)?,
                });
            }
        }

        Ok(eit)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::ATSC_EIT,
            self.source_id,
            self.version_number,
            self.current_next_indicator,
        )
        .with_private(true);
        let mut chain = SectionChain::new(header, max_section_size)
            .with_prefix(&[self.protocol_version, 0x00])
            .with_loops(&[LoopLayout::counted(1, 1)]);

        for event in &self.events {
            let title = &event.title_text[..event.title_text.len().min(u8::MAX as usize)];
            if title.len() < event.title_text.len() {
                warn!(
                    "ATSC EIT 0x{:04X}: title of event 0x{:04X} truncated",
                    self.source_id, event.event_id
                );
            }

            let mut fixed = Vec::with_capacity(12 + title.len());
            fixed.put_u16(0xC000 | (event.event_id & 0x3FFF));
            fixed.put_u32(event.start_time);
            fixed.put_uint(
                0xC0_0000
                    | ((event.etm_location as u64 & 0x03) << 20)
                    | (event.length_in_seconds as u64 & 0x0F_FFFF),
                3,
            );
            fixed.put_u8(title.len() as u8);
            fixed.put_slice(title);
            fixed.put_u16(0xF000);
            chain.push_entity(&fixed, 0x0FFF, &event.descriptors)?;
        }

        chain.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_atsc_eit() {
        let payload = [
            // protocol_version=0, num_events_in_section=1
            0x00, 0x01,
            // event_id=0x0005
            0xC0, 0x05,
            // start_time: 2000-01-01 00:00:13 GPS
            0x25, 0x98, 0x06, 0x0D,
            // ETM_location=1, length 1800 seconds
            0xD0, 0x07, 0x08,
            // title_length=3
            0x03, 0x01, 0x02, 0x03,
            // descriptors_length=3, AC-3 audio descriptor
            0xF0, 0x03, 0x81, 0x01, 0x04,
        ];
        let header = SectionHeader::long(table_id::ATSC_EIT, 0x0101, 0, true).with_private(true);
        let section = RawSection::build(&header, &payload).unwrap();

        let eit = AtscEitTable::decode(&[section]).unwrap();
        assert_eq!(eit.source_id, 0x0101);
        assert_eq!(eit.events.len(), 1);

        let event = &eit.events[0];
        assert_eq!(event.event_id, 5);
        assert_eq!(event.etm_location, 1);
        assert_eq!(event.length_in_seconds, 1800);
        assert_eq!(event.title_text, vec![0x01, 0x02, 0x03]);
        assert_eq!(event.descriptors, vec![Descriptor::new(0x81, vec![0x04])]);
        assert_eq!(
            event.start_time_utc(13),
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn test_atsc_eit_roundtrip_multi_section() {
        let eit = AtscEitTable {
            source_id: 0x0003,
            version_number: 9,
            current_next_indicator: true,
            protocol_version: 0,
            events: (0..60u16)
                .map(|i| AtscEitEvent {
                    event_id: i,
                    start_time: 1_300_000_000 + i as u32 * 1800,
                    etm_location: (i % 3) as u8,
                    length_in_seconds: 1800,
                    title_text: vec![0x01, b'e', b'n', b'g', 0x01, 0x00, 0x00, 0x04, b'N', b'E', b'W', b'S'],
                    descriptors: vec![Descriptor::new(0x86, vec![0xE1, 0x15, 0xC1])],
                })
                .collect(),
        };

        let sections = eit.encode(512).unwrap();
        assert!(sections.len() > 1);
        assert!(sections.iter().all(|s| s.total_len() <= 512));
        assert_eq!(AtscEitTable::decode(&sections).unwrap(), eit);
    }
}
