//! NIT (Network Information Table) and BAT (Bouquet Association Table).
//!
//! The NIT is transmitted on PID 0x0010 and describes the network and its
//! transport streams. The BAT shares the same layout, keyed by bouquet_id
//! instead of network_id, and is carried on PID 0x0011.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::{check_sections, ensure, read_descriptor_loop, table_id, take};
use crate::config::clamp_section_size;
use crate::descriptor::{find_descriptor, Descriptor};
use crate::error::PsiError;
use crate::generator::{LoopLayout, SectionChain};
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PSI_MAX_SECTION_SIZE};

/// Transport stream entry in the NIT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NitTransportStream {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Original network ID.
    pub original_network_id: u16,
    /// Transport descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Parsed NIT or BAT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NitTable {
    /// Table ID (NIT actual/other or BAT).
    pub table_id: u8,
    /// Network ID, or bouquet ID for a BAT.
    pub network_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Network (bouquet) descriptors.
    pub network_descriptors: Vec<Descriptor>,
    /// Transport stream loop.
    pub transport_streams: Vec<NitTransportStream>,
}

impl PsiTable for NitTable {
    const NAME: &'static str = "NIT";
    const MAX_SECTION_SIZE: usize = PSI_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        matches!(id, table_id::NIT_ACTUAL | table_id::NIT_OTHER | table_id::BAT)
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut nit = NitTable {
            table_id: first.header.table_id,
            network_id: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            ..Default::default()
        };

        for section in sections {
            let mut buf = section.payload();
            nit.network_descriptors
                .extend(read_descriptor_loop(&mut buf)?);

            // Transport stream loop length
            ensure(buf, 2)?;
            let ts_loop_length = (buf.get_u16() & 0x0FFF) as usize;
            let mut ts_loop = take(&mut buf, ts_loop_length)?;

            while ts_loop.has_remaining() {
                ensure(ts_loop, 4)?;
                let transport_stream_id = ts_loop.get_u16();
                let original_network_id = ts_loop.get_u16();
                let descriptors = read_descriptor_loop(&mut ts_loop)?;

                nit.transport_streams.push(NitTransportStream {
                    transport_stream_id,
                    original_network_id,
                    descriptors,
                });
            }
        }

        Ok(nit)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            self.table_id,
            self.network_id,
            self.version_number,
            self.current_next_indicator,
        );
        let mut chain = SectionChain::new(header, max_section_size).with_loops(&[
            LoopLayout::with_length(0x0FFF),
            LoopLayout::with_length(0x0FFF),
        ]);

        chain.push_descriptors(&self.network_descriptors)?;
        chain.next_loop();

        for ts in &self.transport_streams {
            let mut fixed = Vec::with_capacity(6);
            fixed.put_u16(ts.transport_stream_id);
            fixed.put_u16(ts.original_network_id);
            fixed.put_u16(0xF000);
            chain.push_entity(&fixed, 0x0FFF, &ts.descriptors)?;
        }

        chain.finish()
    }
}

impl NitTable {
    /// Returns true for a BAT.
    pub fn is_bat(&self) -> bool {
        self.table_id == table_id::BAT
    }

    /// Network name from the network name descriptor (0x40), raw bytes.
    pub fn network_name(&self) -> Option<&[u8]> {
        find_descriptor(&self.network_descriptors, 0x40).map(|d| d.data.as_slice())
    }

    /// Find transport stream by TSID.
    pub fn find_transport_stream(&self, tsid: u16) -> Option<&NitTransportStream> {
        self.transport_streams
            .iter()
            .find(|ts| ts.transport_stream_id == tsid)
    }
}
