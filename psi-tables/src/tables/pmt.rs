//! PMT (Program Map Table).
//!
//! One PMT per program, on the PID announced in the PAT. Lists the PCR PID
//! and the elementary streams of the program.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::{check_sections, ensure, read_descriptor_loop, table_id};
use crate::config::clamp_section_size;
use crate::descriptor::Descriptor;
use crate::error::PsiError;
use crate::generator::{LoopLayout, SectionChain};
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PSI_MAX_SECTION_SIZE};

/// Elementary stream entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmtStream {
    /// Stream type.
    pub stream_type: u8,
    /// Elementary PID.
    pub elementary_pid: u16,
    /// ES info descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Parsed PMT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmtTable {
    /// Program number.
    pub program_number: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// PCR PID.
    pub pcr_pid: u16,
    /// Program info descriptors.
    pub descriptors: Vec<Descriptor>,
    /// Elementary streams.
    pub streams: Vec<PmtStream>,
}

impl PsiTable for PmtTable {
    const NAME: &'static str = "PMT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::PMT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut pmt = PmtTable {
            program_number: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            ..Default::default()
        };

        for (i, section) in sections.iter().enumerate() {
            let mut buf = section.payload();
            ensure(buf, 4)?;

            let pcr_pid = buf.get_u16() & 0x1FFF;
            if i == 0 {
                pmt.pcr_pid = pcr_pid;
            }
            pmt.descriptors.extend(read_descriptor_loop(&mut buf)?);

            while buf.has_remaining() {
                ensure(buf, 3)?;
                let stream_type = buf.get_u8();
                let elementary_pid = buf.get_u16() & 0x1FFF;
                let descriptors = read_descriptor_loop(&mut buf)?;
                pmt.streams.push(PmtStream {
                    stream_type,
                    elementary_pid,
                    descriptors,
                });
            }
        }

        Ok(pmt)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::PMT,
            self.program_number,
            self.version_number,
            self.current_next_indicator,
        );
        let pcr = (0xE000 | (self.pcr_pid & 0x1FFF)).to_be_bytes();
        let mut chain = SectionChain::new(header, max_section_size)
            .with_prefix(&pcr)
            .with_loops(&[LoopLayout::with_length(0x0FFF), LoopLayout::plain()]);

        chain.push_descriptors(&self.descriptors)?;
        chain.next_loop();

        for stream in &self.streams {
            let mut fixed = Vec::with_capacity(5);
            fixed.put_u8(stream.stream_type);
            fixed.put_u16(0xE000 | (stream.elementary_pid & 0x1FFF));
            fixed.put_u16(0xF000);
            chain.push_entity(&fixed, 0x0FFF, &stream.descriptors)?;
        }

        chain.finish()
    }
}

impl PmtTable {
    /// Find a stream by PID.
    pub fn find_stream(&self, pid: u16) -> Option<&PmtStream> {
        self.streams.iter().find(|s| s.elementary_pid == pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pmt() {
        let payload = [
            // reserved + PCR PID = 0x0100
            0xE1, 0x00,
            // program_info_length = 6
            0xF0, 0x06,
            // CA descriptor
            0x09, 0x04, 0x00, 0x05, 0xE2, 0x00,
            // video: stream_type 0x02, PID 0x0111, ES_info_length 3
            0x02, 0xE1, 0x11, 0xF0, 0x03,
            // stream identifier descriptor, component tag 0x00
            0x52, 0x01, 0x00,
            // audio: stream_type 0x0F, PID 0x0112, no descriptors
            0x0F, 0xE1, 0x12, 0xF0, 0x00,
        ];
        let section =
            RawSection::build(&SectionHeader::long(table_id::PMT, 0x0400, 5, true), &payload).unwrap();

        let pmt = PmtTable::decode(&[section]).unwrap();
        assert_eq!(pmt.program_number, 0x0400);
        assert_eq!(pmt.version_number, 5);
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.descriptors, vec![Descriptor::new(0x09, vec![0x00, 0x05, 0xE2, 0x00])]);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].stream_type, 0x02);
        assert_eq!(pmt.streams[0].elementary_pid, 0x0111);
        assert_eq!(pmt.streams[0].descriptors[0].tag, 0x52);
        assert_eq!(pmt.find_stream(0x0112).unwrap().stream_type, 0x0F);
    }

    #[test]
    fn test_parse_pmt_truncated_es_loop() {
        let payload = [0xE1, 0x00, 0xF0, 0x00, 0x02, 0xE1, 0x11, 0xF0, 0x09, 0x52];
        let section =
            RawSection::build(&SectionHeader::long(table_id::PMT, 1, 0, true), &payload).unwrap();
        assert!(matches!(
            PmtTable::decode(&[section]),
            Err(PsiError::IncompletePayload { .. })
        ));
    }

    #[test]
    fn test_pmt_roundtrip_multi_section() {
        let pmt = PmtTable {
            program_number: 0x0401,
            version_number: 2,
            current_next_indicator: true,
            pcr_pid: 0x01FF,
            descriptors: vec![Descriptor::new(0xC1, vec![0x84, 0xFF])],
            streams: (0..60u16)
                .map(|i| PmtStream {
                    stream_type: 0x1B,
                    elementary_pid: 0x0110 + i,
                    descriptors: vec![Descriptor::new(0x52, vec![i as u8]), Descriptor::new(0xC8, vec![0x47; 20])],
                })
                .collect(),
        };

        let sections = pmt.encode(256).unwrap();
        assert!(sections.len() > 1);
        assert!(sections.iter().all(|s| s.total_len() <= 256));
        assert_eq!(PmtTable::decode(&sections).unwrap(), pmt);
    }
}
