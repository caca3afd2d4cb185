//! EIT (Event Information Table).
//!
//! Carried on PID 0x0012. Table 0x4E/0x4F hold present/following events,
//! 0x50-0x6F the schedule. Schedule tables are split into segments of
//! eight sections, and a segment may end early: sections past its
//! `segment_last_section_number` are never sent.

use bytes::{Buf, BufMut};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{check_sections, ensure, table_id, take};
use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::{header_identity_matches, Completion, PsiTable};
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::time::{bcd_duration, mjd_utc_to_datetime};

/// Event entry in the EIT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EitEvent {
    /// Event ID.
    pub event_id: u16,
    /// Start time, 16-bit MJD + 24-bit BCD UTC.
    pub start_time: u64,
    /// Duration, 24-bit BCD `hh:mm:ss`.
    pub duration: u32,
    /// Running status.
    pub running_status: u8,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Event descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl EitEvent {
    /// Start time as UTC, `None` when undefined.
    pub fn start_time_utc(&self) -> Option<NaiveDateTime> {
        mjd_utc_to_datetime(self.start_time)
    }

    /// Duration, `None` when the BCD is invalid.
    pub fn duration(&self) -> Option<Duration> {
        bcd_duration(self.duration)
    }
}

/// Parsed EIT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EitTable {
    /// Table ID.
    pub table_id: u8,
    /// Service ID.
    pub service_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Original network ID.
    pub original_network_id: u16,
    /// Segment last section number of the first section. Encoding
    /// writes the real end of each section's segment instead.
    pub segment_last_section_number: u8,
    /// Last table ID.
    pub last_table_id: u8,
    /// Events.
    pub events: Vec<EitEvent>,
}

/// transport_stream_id and original_network_id at the start of the payload.
fn stream_ids(section: &RawSection) -> Option<(u16, u16)> {
    let data = section.payload();
    (data.len() >= 4).then(|| {
        (
            u16::from_be_bytes([data[0], data[1]]),
            u16::from_be_bytes([data[2], data[3]]),
        )
    })
}

impl PsiTable for EitTable {
    const NAME: &'static str = "EIT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;
    const COMPLETION: Completion = Completion::Segmented;

    fn accepts_table_id(id: u8) -> bool {
        (table_id::EIT_PF_ACTUAL..=table_id::EIT_SCHEDULE_OTHER_LAST).contains(&id)
    }

    fn identity_matches(first: &RawSection, section: &RawSection) -> bool {
        header_identity_matches(first, section) && stream_ids(first) == stream_ids(section)
    }

    fn segment_last_section_number(section: &RawSection) -> Option<u8> {
        section.payload().get(4).copied()
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;
        let header = first.payload();
        ensure(header, 6)?;

        let mut eit = EitTable {
            table_id: first.header.table_id,
            service_id: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            transport_stream_id: u16::from_be_bytes([header[0], header[1]]),
            original_network_id: u16::from_be_bytes([header[2], header[3]]),
            segment_last_section_number: header[4],
            last_table_id: header[5],
            events: Vec::new(),
        };

        for section in sections {
            let mut buf = section.payload();
            take(&mut buf, 6)?;

            while buf.has_remaining() {
                ensure(buf, 12)?;
                let event_id = buf.get_u16();
                let start_time = buf.get_uint(5);
                let duration = buf.get_uint(3) as u32;
                let status = buf.get_u16();
                let descriptors_length = (status & 0x0FFF) as usize;

                eit.events.push(EitEvent {
                    event_id,
                    start_time,
                    duration,
                    running_status: (status >> 13) as u8,
                    free_ca_mode: status & 0x1000 != 0,
                    descriptors: parse_descriptor_loop(take(&mut buf, descriptors_length)?)?,
                });
            }
        }

        Ok(eit)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            self.table_id,
            self.service_id,
            self.version_number,
            self.current_next_indicator,
        );
        let mut prefix = Vec::with_capacity(6);
        prefix.put_u16(self.transport_stream_id);
        prefix.put_u16(self.original_network_id);
        prefix.put_u8(self.segment_last_section_number);
        prefix.put_u8(self.last_table_id);
        let mut chain = SectionChain::new(header, max_section_size).with_prefix(&prefix);

        for event in &self.events {
            let mut fixed = Vec::with_capacity(12);
            fixed.put_u16(event.event_id);
            fixed.put_uint(event.start_time & 0xFF_FFFF_FFFF, 5);
            fixed.put_uint(event.duration as u64 & 0xFF_FFFF, 3);
            fixed.put_u16(
                ((event.running_status as u16 & 0x07) << 13) | ((event.free_ca_mode as u16) << 12),
            );
            chain.push_entity(&fixed, 0x0FFF, &event.descriptors)?;
        }

        // segment_last_section_number: last section of the 8-section segment
        chain.finish_with(|number, last, payload| {
            if let Some(segment_last) = payload.get_mut(4) {
                *segment_last = (number | 0x07).min(last);
            }
        })
    }
}

impl EitTable {
    /// Present/following (as opposed to schedule) table.
    pub fn is_present_following(&self) -> bool {
        matches!(self.table_id, table_id::EIT_PF_ACTUAL | table_id::EIT_PF_OTHER)
    }

    /// Find event by event ID.
    pub fn find_event(&self, event_id: u16) -> Option<&EitEvent> {
        self.events.iter().find(|e| e.event_id == event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TableDecoder;
    use chrono::NaiveDate;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_parse_eit() {
        let payload = [
            // transport_stream_id=0x7FE1, original_network_id=0x7FE1
            0x7F, 0xE1, 0x7F, 0xE1,
            // segment_last_section_number=1, last_table_id=0x4E
            0x01, 0x4E,
            // event_id=0x1234
            0x12, 0x34,
            // start_time 1993-10-13 12:45:00
            0xC0, 0x79, 0x12, 0x45, 0x00,
            // duration 01:30:00
            0x01, 0x30, 0x00,
            // running_status=4, free_ca=1, descriptors_length=4
            0x90, 0x04,
            // component descriptor
            0x50, 0x02, 0x01, 0xB3,
        ];
        let mut header = SectionHeader::long(table_id::EIT_PF_ACTUAL, 0x0400, 7, true);
        header.last_section_number = 1;
        let section = RawSection::build(&header, &payload).unwrap();

        let eit = EitTable::decode(&[section]).unwrap();
        assert!(eit.is_present_following());
        assert_eq!(eit.service_id, 0x0400);
        assert_eq!(eit.transport_stream_id, 0x7FE1);
        assert_eq!(eit.segment_last_section_number, 1);
        assert_eq!(eit.last_table_id, 0x4E);

        let event = eit.find_event(0x1234).unwrap();
        assert_eq!(event.running_status, 4);
        assert!(event.free_ca_mode);
        assert_eq!(
            event.start_time_utc(),
            NaiveDate::from_ymd_opt(1993, 10, 13).unwrap().and_hms_opt(12, 45, 0)
        );
        assert_eq!(event.duration(), Some(Duration::minutes(90)));
        assert_eq!(event.descriptors, vec![Descriptor::new(0x50, vec![0x01, 0xB3])]);
    }

    #[test]
    fn test_eit_identity_compares_stream_ids() {
        let header = SectionHeader {
            last_section_number: 1,
            ..SectionHeader::long(table_id::EIT_PF_ACTUAL, 0x0400, 0, true)
        };
        let first = RawSection::build(&header, &[0x00, 0x01, 0x00, 0x02, 0x01, 0x4E]).unwrap();
        let other_ts = RawSection::build(&header, &[0x00, 0x03, 0x00, 0x02, 0x01, 0x4E]).unwrap();
        let other_onid = RawSection::build(&header, &[0x00, 0x01, 0x00, 0x04, 0x01, 0x4E]).unwrap();

        assert!(EitTable::identity_matches(&first, &first));
        assert!(!EitTable::identity_matches(&first, &other_ts));
        assert!(!EitTable::identity_matches(&first, &other_onid));
    }

    fn schedule_section(number: u8, segment_last: u8) -> RawSection {
        let header = SectionHeader {
            section_number: number,
            last_section_number: 0x18,
            ..SectionHeader::long(table_id::EIT_SCHEDULE_ACTUAL_FIRST, 0x0400, 3, true)
        };
        RawSection::build(&header, &[0x7F, 0xE1, 0x7F, 0xE1, segment_last, 0x50]).unwrap()
    }

    #[test]
    fn test_eit_schedule_segments() {
        init_logger();
        let mut tables = Vec::new();
        let mut decoder = TableDecoder::new(|eit: EitTable| tables.push(eit));

        // segments end at 0x00, 0x09, 0x10 and 0x18
        for (number, segment_last) in [(0x00, 0x00), (0x08, 0x09), (0x09, 0x09), (0x10, 0x10)] {
            assert!(!decoder.push_section(schedule_section(number, segment_last)));
        }
        assert!(decoder.push_section(schedule_section(0x18, 0x18)));
        drop(decoder);

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_id, 0x50);
    }

    #[test]
    fn test_eit_schedule_missing_segment_section() {
        init_logger();
        let mut count = 0;
        let mut decoder = TableDecoder::new(|_: EitTable| count += 1);

        // segment 1 declares 0x09 as its last section but only 0x08 arrives
        for (number, segment_last) in [(0x00, 0x00), (0x08, 0x09), (0x10, 0x10), (0x18, 0x18)] {
            decoder.push_section(schedule_section(number, segment_last));
        }
        assert!(decoder.reassembler().is_building());
        drop(decoder);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_eit_roundtrip_multi_section() {
        let eit = EitTable {
            table_id: 0x51,
            service_id: 0x0101,
            version_number: 1,
            current_next_indicator: true,
            transport_stream_id: 0x0001,
            original_network_id: 0x0002,
            segment_last_section_number: 0x07,
            last_table_id: 0x51,
            events: (0..120u16)
                .map(|i| EitEvent {
                    event_id: i,
                    start_time: 0xE4F2_0000_00 + i as u64,
                    duration: 0x00_30_00,
                    running_status: 1,
                    free_ca_mode: false,
                    descriptors: vec![Descriptor::new(0x4D, vec![b'j', b'p', b'n', 3, b'N', b'E', b'W', 0])],
                })
                .collect(),
        };

        // 22 events per section, so six sections in a single segment
        let sections = eit.encode(512).unwrap();
        assert_eq!(sections.len(), 6);
        for section in &sections {
            assert_eq!(&section.payload()[..6], &[0x00, 0x01, 0x00, 0x02, 0x05, 0x51]);
            assert!(section.total_len() <= 512);
        }

        let expected = EitTable {
            segment_last_section_number: 0x05,
            ..eit
        };
        assert_eq!(EitTable::decode(&sections).unwrap(), expected);
    }

    fn schedule_eit(events: u16) -> EitTable {
        EitTable {
            table_id: table_id::EIT_SCHEDULE_ACTUAL_FIRST,
            service_id: 0x0400,
            version_number: 2,
            current_next_indicator: true,
            transport_stream_id: 0x7FE1,
            original_network_id: 0x7FE1,
            segment_last_section_number: 0x07,
            last_table_id: 0x50,
            events: (0..events)
                .map(|i| EitEvent {
                    event_id: i,
                    start_time: 0xE4F2_0000_00 + i as u64,
                    duration: 0x00_30_00,
                    running_status: 1,
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_eit_encode_segment_last_per_section() {
        // three 12-byte events fit in 64 bytes
        let sections = schedule_eit(30).encode(64).unwrap();
        assert_eq!(sections.len(), 10);

        let segment_lasts: Vec<u8> = sections.iter().map(|s| s.payload()[4]).collect();
        assert_eq!(segment_lasts, [7, 7, 7, 7, 7, 7, 7, 7, 9, 9]);
    }

    #[test]
    fn test_eit_encoded_schedule_waits_for_lost_section() {
        init_logger();
        let eit = schedule_eit(30);
        let sections = eit.encode(64).unwrap();

        let mut tables = Vec::new();
        let mut decoder = TableDecoder::new(|table: EitTable| tables.push(table));
        for (i, section) in sections.iter().enumerate() {
            if i != 2 {
                assert!(!decoder.push_section(section.clone()));
            }
        }
        assert!(decoder.reassembler().is_building());

        assert!(!decoder.push_section(sections[2].clone()));
        assert!(decoder.push_section(sections[9].clone()));
        drop(decoder);

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].events, eit.events);
    }

    #[test]
    fn test_eit_encode_caps_section_size() {
        let sections = schedule_eit(400).encode(8192).unwrap();
        assert!(sections.len() > 1);
        assert!(sections.iter().all(|s| s.total_len() <= PRIVATE_MAX_SECTION_SIZE));
    }
}
