//! CAT (Conditional Access Table).
//!
//! Transmitted on PID 0x0001. Carries CA descriptors naming the EMM PIDs of
//! each conditional access system.

use serde::{Deserialize, Serialize};

use super::{check_sections, table_id};
use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PSI_MAX_SECTION_SIZE};

/// Parsed CAT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatTable {
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// CA descriptors, in section order.
    pub descriptors: Vec<Descriptor>,
}

impl PsiTable for CatTable {
    const NAME: &'static str = "CAT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::CAT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut descriptors = Vec::new();
        for section in sections {
            descriptors.extend(parse_descriptor_loop(section.payload())?);
        }

        Ok(CatTable {
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            descriptors,
        })
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            table_id::CAT,
            0xFFFF,
            self.version_number,
            self.current_next_indicator,
        );
        let mut chain = SectionChain::new(header, max_section_size);
        chain.push_descriptors(&self.descriptors)?;
        chain.finish()
    }
}

impl CatTable {
    /// EMM PIDs of every CA descriptor (0x09).
    pub fn emm_pids(&self) -> Vec<u16> {
        self.descriptors
            .iter()
            .filter(|d| d.tag == 0x09 && d.data.len() >= 4)
            .map(|d| ((d.data[2] as u16 & 0x1F) << 8) | d.data[3] as u16)
            .collect()
    }
}
