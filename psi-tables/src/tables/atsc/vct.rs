//! VCT (Virtual Channel Table), terrestrial (TVCT) and cable (CVCT).

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use super::protocol_version;
use crate::config::clamp_section_size;
use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::generator::{LoopLayout, SectionChain};
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionHeader, PRIVATE_MAX_SECTION_SIZE};
use crate::tables::{check_sections, ensure, table_id, take};

/// Size of a channel entry before its descriptors.
const CHANNEL_FIXED_SIZE: usize = 32;

/// One virtual channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VctChannel {
    /// Short name, seven UTF-16 code units.
    pub short_name: [u16; 7],
    /// Major channel number (10 bits).
    pub major_channel_number: u16,
    /// Minor channel number (10 bits).
    pub minor_channel_number: u16,
    /// Modulation mode.
    pub modulation_mode: u8,
    /// Carrier frequency (deprecated, usually 0).
    pub carrier_frequency: u32,
    /// Transport stream carrying the channel.
    pub channel_tsid: u16,
    /// MPEG-2 program number.
    pub program_number: u16,
    /// ETM location (2 bits).
    pub etm_location: u8,
    /// Access controlled flag.
    pub access_controlled: bool,
    /// Hidden flag.
    pub hidden: bool,
    /// Path select (cable only).
    pub path_select: bool,
    /// Out of band (cable only).
    pub out_of_band: bool,
    /// Hide guide flag.
    pub hide_guide: bool,
    /// Service type (6 bits).
    pub service_type: u8,
    /// Source ID, the key used by EIT/ETT.
    pub source_id: u16,
    /// Channel descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl VctChannel {
    /// Short name decoded from UTF-16, trailing NULs removed.
    pub fn name(&self) -> String {
        String::from_utf16_lossy(&self.short_name)
            .trim_end_matches('\0')
            .to_string()
    }
}

/// Parsed VCT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VctTable {
    /// Table ID (TVCT or CVCT).
    pub table_id: u8,
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Protocol version.
    pub protocol_version: u8,
    /// Channels.
    pub channels: Vec<VctChannel>,
    /// Additional descriptors.
    pub descriptors: Vec<Descriptor>,
}

impl PsiTable for VctTable {
    const NAME: &'static str = "VCT";
    const MAX_SECTION_SIZE: usize = PRIVATE_MAX_SECTION_SIZE;

    fn accepts_table_id(id: u8) -> bool {
        matches!(id, table_id::ATSC_TVCT | table_id::ATSC_CVCT)
    }

    fn decode(sections: &[RawSection]) -> Result<Self, PsiError> {
        let first = check_sections::<Self>(sections)?;

        let mut vct = VctTable {
            table_id: first.header.table_id,
            transport_stream_id: first.header.extension,
            version_number: first.header.version,
            current_next_indicator: first.header.current_next,
            protocol_version: protocol_version(first)?,
            ..Default::default()
        };

        for section in sections {
            let mut buf = section.payload();
            ensure(buf, 2)?;
            buf.advance(1);
            let num_channels_in_section = buf.get_u8();

            for _ in 0..num_channels_in_section {
                ensure(buf, CHANNEL_FIXED_SIZE)?;
                let mut short_name = [0u16; 7];
                for unit in short_name.iter_mut() {
                    *unit = buf.get_u16();
                }
                let numbers = buf.get_uint(3) as u32;
                let modulation_mode = buf.get_u8();
                let carrier_frequency = buf.get_u32();
                let channel_tsid = buf.get_u16();
                let program_number = buf.get_u16();
                let flags = buf.get_u16();
                let source_id = buf.get_u16();
                let descriptors_length = (buf.get_u16() & 0x03FF) as usize;

                vct.channels.push(VctChannel {
                    short_name,
                    major_channel_number: ((numbers >> 10) & 0x03FF) as u16,
                    minor_channel_number: (numbers & 0x03FF) as u16,
                    modulation_mode,
                    carrier_frequency,
                    channel_tsid,
                    program_number,
                    etm_location: (flags >> 14) as u8,
                    access_controlled: flags & 0x2000 != 0,
                    hidden: flags & 0x1000 != 0,
                    path_select: flags & 0x0800 != 0,
                    out_of_band: flags & 0x0400 != 0,
                    hide_guide: flags & 0x0200 != 0,
                    service_type: (flags & 0x003F) as u8,
                    source_id,
                    descriptors: parse_descriptor_loop(take(&mut buf, descriptors_length)?)?,
                });
            }

            ensure(buf, 2)?;
            let additional_length = (buf.get_u16() & 0x03FF) as usize;
            vct.descriptors
                .extend(parse_descriptor_loop(take(&mut buf, additional_length)?)?);
        }

        Ok(vct)
    }

    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError> {
        let max_section_size = clamp_section_size::<Self>(max_section_size);
        let header = SectionHeader::long(
            self.table_id,
            self.transport_stream_id,
            self.version_number,
            self.current_next_indicator,
        )
        .with_private(true);
        let mut chain = SectionChain::new(header, max_section_size)
            .with_prefix(&[self.protocol_version, 0x00])
            .with_loops(&[LoopLayout::counted(1, 1), LoopLayout::with_length(0x03FF)]);

        for channel in &self.channels {
            let mut fixed = Vec::with_capacity(CHANNEL_FIXED_SIZE);
            for &unit in &channel.short_name {
                fixed.put_u16(unit);
            }
            let numbers = 0xF0_0000
                | ((channel.major_channel_number as u64 & 0x03FF) << 10)
                | (channel.minor_channel_number as u64 & 0x03FF);
            fixed.put_uint(numbers, 3);
            fixed.put_u8(channel.modulation_mode);
            fixed.put_u32(channel.carrier_frequency);
            fixed.put_u16(channel.channel_tsid);
            fixed.put_u16(channel.program_number);
            fixed.put_u16(
                ((channel.etm_location as u16 & 0x03) << 14)
                    | ((channel.access_controlled as u16) << 13)
                    | ((channel.hidden as u16) << 12)
                    | ((channel.path_select as u16) << 11)
                    | ((channel.out_of_band as u16) << 10)
                    | ((channel.hide_guide as u16) << 9)
                    | 0x01C0
                    | (channel.service_type as u16 & 0x3F),
            );
            fixed.put_u16(channel.source_id);
            fixed.put_u16(0xFC00);
            chain.push_entity(&fixed, 0x03FF, &channel.descriptors)?;
        }

        chain.next_loop();
        chain.push_descriptors(&self.descriptors)?;
        chain.finish()
    }
}

impl VctTable {
    /// Cable VCT.
    pub fn is_cable(&self) -> bool {
        self.table_id == table_id::ATSC_CVCT
    }

    /// Find a channel by major/minor number.
    pub fn find_channel(&self, major: u16, minor: u16) -> Option<&VctChannel> {
        self.channels
            .iter()
            .find(|c| c.major_channel_number == major && c.minor_channel_number == minor)
    }
}
