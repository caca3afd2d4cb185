//! PAT (Program Association Table).
//!
//! The PAT is transmitted on PID 0x0000 and contains a list of programs
//! with their PMT PIDs.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::{check_sections, table_id};
use crate::config::clamp_section_size;
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PSI_MAX_SECTION_SIZE};

/// A single PAT entry (program number and PMT PID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatEntry {
    /// Program number (0 = NIT, others = service).
    pub program_number: u16,
    /// PID of the PMT for this program (or NIT PID if program_number = 0).
    pub pid: u16,
}

/// Parsed PAT (Program Association Table).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatTable {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Programs in section order, NIT entry included.
    pub programs: Vec<PatEntry>,
}

impl PsiTable for PatTable {
    const NAME: &'static str = "PAT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::PAT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut programs = Vec::new();
        for section in sections {
            // Each program entry is 4 bytes
            let data = section.payload();
            if data.len() % 4 != 0 {
                return Err(PsiError::IncompletePayload {
                    expected: (data.len() / 4 + 1) * 4,
                    actual: data.len(),
                });
            }

            let mut buf = data;
            while buf.has_remaining() {
                let program_number = buf.get_u16();
                let pid = buf.get_u16() & 0x1FFF;
                programs.push(PatEntry {
                    program_number,
                    pid,
                });
            }
        }

        Ok(PatTable {
            transport_stream_id: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            programs,
        })
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::PAT,
            self.transport_stream_id,
            self.version_number,
            self.current_next_indicator,
        );
        let mut chain = SectionChain::new(header, max_section_size);
        for program in &self.programs {
            let mut entry = [0u8; 4];
            let mut out = &mut entry[..];
            out.put_u16(program.program_number);
            out.put_u16(0xE000 | (program.pid & 0x1FFF));
            chain.push_item(&entry)?;
        }
        chain.finish()
    }
}

impl PatTable {
    /// NIT PID (entry with program_number 0).
    pub fn nit_pid(&self) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == 0)
            .map(|p| p.pid)
    }

    /// Get PMT PID for a specific program number.
    pub fn get_pmt_pid(&self, program_number: u16) -> Option<u16> {
        if program_number == 0 {
            return None;
        }
        self.programs
            .iter()
            .find(|p| p.program_number == program_number)
            .map(|p| p.pid)
    }

    /// Get all PMT PIDs.
    pub fn get_all_pmt_pids(&self) -> Vec<u16> {
        self.programs
            .iter()
            .filter(|p| p.program_number != 0)
            .map(|p| p.pid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PsiConfig;

    #[test]
    fn test_parse_pat() {
        let data = [
            // NIT: number=0x0000, PID=0x0010
            0x00, 0x00, 0xE0, 0x10,
            // Program 1: number=0x0101, PID=0x0100
            0x01, 0x01, 0xE1, 0x00,
            // Program 2: number=0x0102, PID=0x0200
            0x01, 0x02, 0xE2, 0x00,
        ];
        let section =
            RawSection::build(&SectionHeader::long(table_id::PAT, 0x1234, 1, true), &data).unwrap();

        let pat = PatTable::decode(&[section]).unwrap();

        assert_eq!(pat.transport_stream_id, 0x1234);
        assert_eq!(pat.version_number, 1);
        assert_eq!(pat.programs.len(), 3);
        assert_eq!(pat.nit_pid(), Some(0x0010));
        assert_eq!(pat.get_pmt_pid(0x0102), Some(0x0200));
        assert_eq!(pat.get_all_pmt_pids(), vec![0x0100, 0x0200]);
    }

    #[test]
    fn test_parse_pat_bad_length() {
        let section = RawSection::build(
            &SectionHeader::long(table_id::PAT, 1, 0, true),
            &[0x00, 0x01, 0xE1],
        )
        .unwrap();
        assert!(matches!(
            PatTable::decode(&[section]),
            Err(PsiError::IncompletePayload { .. })
        ));
    }

    #[test]
    fn test_encode_known_pat() {
        let pat = PatTable {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            programs: vec![PatEntry {
                program_number: 1,
                pid: 0x1000,
            }],
        };
        let sections = pat.encode(1024).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].crc32(), Some(0x2AB1_04B2));
    }

    #[test]
    fn test_pat_multi_section() {
        let pat = PatTable {
            transport_stream_id: 0x4321,
            version_number: 17,
            current_next_indicator: false,
            programs: (1..=300u16)
                .map(|n| PatEntry {
                    program_number: n,
                    pid: 0x0100 + n,
                })
                .collect(),
        };

        // 1012 bytes of room hold 253 entries
        let sections = pat.encode(1024).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].payload().len(), 253 * 4);
        assert_eq!(PatTable::decode(&sections).unwrap(), pat);
    }

    #[test]
    fn test_pat_encode_caps_section_size() {
        let pat = PatTable {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            programs: (1..=500u16)
                .map(|n| PatEntry {
                    program_number: n,
                    pid: 0x0100 + n,
                })
                .collect(),
        };

        let sections = pat.encode(4096).unwrap();
        assert_eq!(sections.len(), 2);
        assert!(sections.iter().all(|s| s.as_bytes().len() <= PSI_MAX_SECTION_SIZE));
        assert_eq!(PatTable::decode(&sections).unwrap(), pat);
    }

    #[test]
    fn test_pat_encode_with_config() {
        let pat = PatTable {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            programs: (1..=100u16)
                .map(|n| PatEntry {
                    program_number: n,
                    pid: 0x0100 + n,
                })
                .collect(),
        };

        let config = PsiConfig {
            max_section_size: Some(188),
            ..Default::default()
        };
        let sections = pat.encode_with(&config).unwrap();
        // 176 bytes of room hold 44 entries
        assert_eq!(sections.len(), 3);
        assert!(sections.iter().all(|s| s.as_bytes().len() <= 188));
        assert_eq!(PatTable::decode(&sections).unwrap(), pat);

        let sections = pat.encode_with(&PsiConfig::default()).unwrap();
        assert_eq!(sections.len(), 1);
    }
}
