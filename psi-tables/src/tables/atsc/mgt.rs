//! MGT (Master Guide Table).
//!
//! Lists every other PSIP table in the stream with its PID, version and
//! size.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::protocol_version;
use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::{LoopLayout, SectionChain};
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::tables::{check_sections, ensure, read_descriptor_loop, table_id, take};

/// One table announced by the MGT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MgtEntry {
    /// Table type (0x0000 TVCT current, 0x0100-0x017F EIT-0..127, ...).
    pub table_type: u16,
    /// PID carrying the table.
    pub table_type_pid: u16,
    /// Version of the announced table.
    pub table_type_version_number: u8,
    /// Size of the announced table in bytes.
    pub number_bytes: u32,
    /// Table type descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Parsed MGT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MgtTable {
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Protocol version.
    pub protocol_version: u8,
    /// Announced tables.
    pub tables: Vec<MgtEntry>,
    /// Table-level descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl PsiTable for MgtTable {
    const NAME: &'static str = "MGT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        id == table_id::ATSC_MGT
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut mgt = MgtTable {
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            protocol_version: protocol_version(first)?,
            ..Default::default()
        };

        for section in sections {
            let mut buf = section.payload();
            ensure(buf, 3)?;
            buf.advance(1);
            let tables_defined = buf.get_u16();

            for _ in 0..tables_defined {
                ensure(buf, 11)?;
                let table_type = buf.get_u16();
                let table_type_pid = buf.get_u16() & 0x1FFF;
                let table_type_version_number = buf.get_u8() & 0x1F;
                let number_bytes = buf.get_u32();
                let descriptors_length = (buf.get_u16() & 0x0FFF) as usize;

                mgt.tables.push(MgtEntry {
                    table_type,
                    table_type_pid,
                    table_type_version_number,
                    number_bytes,
                    descriptors: parse_descriptor_loop(take(&mut buf, descriptors_length)?)?,
                });
            }

            mgt.descriptors.extend(read_descriptor_loop(&mut buf)?);
        }

        Ok(mgt)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header =
            SectionHeader::long(table_id::ATSC_MGT, 0x0000, self.version_number, self.current_next_indicator)
                .with_private(true);
        let mut chain = SectionChain::new(header, max_section_size)
            .with_prefix(&[self.protocol_version, 0x00, 0x00])
            .with_loops(&[LoopLayout::counted(1, 2), LoopLayout::with_length(0x0FFF)]);

        for entry in &self.tables {
            let mut fixed = Vec::with_capacity(11);
            fixed.put_u16(entry.table_type);
            fixed.put_u16(0xE000 | (entry.table_type_pid & 0x1FFF));
            fixed.put_u8(0xE0 | (entry.table_type_version_number & 0x1F));
            fixed.put_u32(entry.number_bytes);
            fixed.put_u16(0xF000);
            chain.push_entity(&fixed, 0x0FFF, &entry.descriptors)?;
        }

        chain.next_loop();
        chain.push_descriptors(&self.descriptors)?;
        chain.finish()
    }
}

impl MgtTable {
    /// PID of the table with the given type.
    pub fn pid_of(&self, table_type: u16) -> Option<u16> {
        self.tables
            .iter()
            .find(|t| t.table_type == table_type)
            .map(|t| t.table_type_pid)
    }
}
