//! SDT (Service Description Table).
//!
//! The SDT is transmitted on PID 0x0011 and contains information about
//! services (channels) in a transport stream.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::{check_sections, ensure, table_id, take};
use crate::config::clamp_section_size;
use crate::descriptor::{find_descriptor, parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::SectionChain;
use crate::reassembly::{header_identity_matches, PsiTable};
use crate::section::{RawSection, SectionHeader, PSI_MAX_SECTION_SIZE};

/// Service entry in the SDT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdtService {
    /// Service ID (program number).
    pub service_id: u16,
    /// EIT schedule flag.
    pub eit_schedule_flag: bool,
    /// EIT present/following flag.
    pub eit_present_following_flag: bool,
    /// Running status.
    pub running_status: u8,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Service descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl SdtService {
    /// Service type from the service descriptor (0x48).
    pub fn service_type(&self) -> Option<u8> {
        find_descriptor(&self.descriptors, 0x48).and_then(|d| d.data.first().copied())
    }

    /// Get running status name.
    pub fn running_status_name(&self) -> &'static str {
        match self.running_status {
            0 => "Undefined",
            1 => "Not running",
            2 => "Starts in a few seconds",
            3 => "Pausing",
            4 => "Running",
            5 => "Service off-air",
            _ => "Reserved",
        }
    }
}

/// Parsed SDT (Service Description Table).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdtTable {
    /// Table ID (actual or other).
    pub table_id: u8,
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Original network ID.
    pub original_network_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Services.
    pub services: Vec<SdtService>,
}

/// original_network_id at the start of an SDT payload.
fn original_network_id(section: &RawSection) -> Option<u16> {
    let data = section.payload();
    (data.len() >= 2).then(|| u16::from_be_bytes([data[0], data[1]]))
}

impl PsiTable for SdtTable {
    const NAME: &'static str = "SDT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        matches!(id, table_id::SDT_ACTUAL | table_id::SDT_OTHER)
    }

    fn identity_matches(first: &RawSection, section: &RawSection) -> bool {
        header_identity_matches(first, section)
            && original_network_id(first) == original_network_id(section)
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;
        ensure(first.payload(), 3)?;

        let mut sdt = SdtTable {
            table_id: first.header.table_id,
            transport_stream_id: first.header.extension,
            original_network_id: original_network_id(first).unwrap_or_default(),
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            services: Vec::new(),
        };

        for section in sections {
            let mut buf = section.payload();
            // original_network_id + reserved byte
            take(&mut buf, 3)?;

            while buf.has_remaining() {
                ensure(buf, 5)?;
                let service_id = buf.get_u16();
                let flags = buf.get_u8();
                let status = buf.get_u16();
                let descriptors_length = (status & 0x0FFF) as usize;

                sdt.services.push(SdtService {
                    service_id,
                    eit_schedule_flag: flags & 0x02 != 0,
                    eit_present_following_flag: flags & 0x01 != 0,
                    running_status: (status >> 13) as u8,
                    free_ca_mode: status & 0x1000 != 0,
                    descriptors: parse_descriptor_loop(take(&mut buf, descriptors_length)?)?,
                });
            }
        }

        Ok(sdt)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            self.table_id,
            self.transport_stream_id,
            self.version_number,
            self.current_next_indicator,
        );
        let mut prefix = Vec::with_capacity(3);
        prefix.put_u16(self.original_network_id);
        prefix.put_u8(0xFF);
        let mut chain = SectionChain::new(header, max_section_size).with_prefix(&prefix);

        for service in &self.services {
            let mut fixed = Vec::with_capacity(5);
            fixed.put_u16(service.service_id);
            fixed.put_u8(
                0xFC | (service.eit_schedule_flag as u8) << 1
                    | service.eit_present_following_flag as u8,
            );
            fixed.put_u16(
                ((service.running_status as u16 & 0x07) << 13)
                    | ((service.free_ca_mode as u16) << 12),
            );
            chain.push_entity(&fixed, 0x0FFF, &service.descriptors)?;
        }

        chain.finish()
    }
}

impl SdtTable {
    /// Find service by service ID.
    pub fn find_service(&self, service_id: u16) -> Option<&SdtService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    /// Check if this is SDT actual (for current TS).
    pub fn is_actual(&self) -> bool {
        self.table_id == table_id::SDT_ACTUAL
    }
}
