//! ETT (Extended Text Table): long descriptions for channels and events.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::protocol_version;
use crate::config::clamp_section_size;
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::tables::{check_sections, ensure, table_id};

/// Parsed ETT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EttTable {
    /// Table ID extension.
    pub table_id_extension: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Protocol version.
    pub protocol_version: u8,
    /// Extended text message ID: source_id, event_id and type.
    pub etm_id: u32,
    /// Multiple string structure, kept raw.
    pub extended_text_message: Vec<u8>,
}

impl PsiTable for EttTable {
    const NAME: &'static str = "ETT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::ATSC_ETT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut ett = EttTable {
            table_id_extension: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            protocol_version: protocol_version(first)?,
            ..Default::default()
        };

        for (i, section) in sections.iter().enumerate() {
            let mut buf = section.payload();
            ensure(buf, 5)?;
            buf.advance(1);
            let etm_id = buf.get_u32();
            if i == 0 {
                ett.etm_id = etm_id;
            }
            ett.extended_text_message.extend_from_slice(buf);
        }

        Ok(ett)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::ATSC_ETT,
            self.table_id_extension,
            self.version_number,
            self.current_next_indicator,
        )
        .with_private(true);
        let mut prefix = Vec::with_capacity(5);
        prefix.put_u8(self.protocol_version);
        prefix.put_u32(self.etm_id);

        let mut chain = SectionChain::new(header, max_section_size).with_prefix(&prefix);
        let chunk_len = chain.capacity().saturating_sub(prefix.len()).max(1);
        for chunk in self.extended_text_message.chunks(chunk_len) {
            chain.push_item(chunk)?;
        }
        chain.finish()
    }
}

impl EttTable {
    /// Source ID part of the ETM ID.
    pub fn source_id(&self) -> u16 {
        (self.etm_id >> 16) as u16
    }

    /// Event ID when the message describes an event.
    pub fn event_id(&self) -> Option<u16> {
        (self.etm_id & 0x03 == 0x02).then(|| ((self.etm_id >> 2) & 0x3FFF) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ett() {
        let payload = [
            // protocol_version=0
            0x00,
            // ETM_id: source 0x0101, event 0x0005, event ETM
            0x01, 0x01, 0x00, 0x16,
            // one string, "eng", one segment, no compression, mode 0, 2 bytes
            0x01, b'e', b'n', b'g', 0x01, 0x00, 0x00, 0x02, b'H', b'i',
        ];
        let header = SectionHeader::long(table_id::ATSC_ETT, 0x0000, 3, true).with_private(true);
        let section = RawSection::build(&header, &payload).unwrap();

        let ett = EttTable::decode(&[section]).unwrap();
        assert_eq!(ett.version_number, 3);
        assert_eq!(ett.source_id(), 0x0101);
        assert_eq!(ett.event_id(), Some(5));
        assert_eq!(ett.extended_text_message.len(), 10);
    }

    #[test]
    fn test_channel_ett_has_no_event() {
        let ett = EttTable {
            etm_id: 0x0101_0000,
            ..Default::default()
        };
        assert_eq!(ett.event_id(), None);
    }

    #[test]
    fn test_ett_roundtrip() {
        let ett = EttTable {
            table_id_extension: 0x1234,
            version_number: 1,
            current_next_indicator: true,
            protocol_version: 0,
            etm_id: 0x0003_0016,
            extended_text_message: b"\x01eng\x01\x00\x00\x05Hello".to_vec(),
        };
        let sections = ett.encode(4096).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(EttTable::decode(&sections).unwrap(), ett);
    }

    #[test]
    fn test_ett_long_message_spans_sections() {
        let ett = EttTable {
            table_id_extension: 0x0001,
            version_number: 4,
            current_next_indicator: true,
            protocol_version: 0,
            etm_id: 0x0101_0016,
            extended_text_message: (0..3000u32).map(|i| i as u8).collect(),
        };

        let sections = ett.encode(1024).unwrap();
        assert_eq!(sections.len(), 3);
        for section in &sections {
            assert!(section.total_len() <= 1024);
            assert_eq!(&section.payload()[1..5], &[0x01, 0x01, 0x00, 0x16]);
        }
        assert_eq!(EttTable::decode(&sections).unwrap(), ett);

        let ett = EttTable {
            extended_text_message: vec![0x20; 5000],
            ..ett
        };
        let sections = ett.encode(4096).unwrap();
        assert_eq!(sections.len(), 2);
        assert!(sections.iter().all(|s| s.total_len() <= 4096));
        assert_eq!(EttTable::decode(&sections).unwrap(), ett);
    }
}
