//! Table generator: packs a table into as many sections as it needs.
//!
//! A section payload is laid out as a fixed prefix followed by one or more
//! loops:
//!
//! ```text
//! +--------+--------------+---------------+--------------+---------------+
//! | prefix | [len] loop 0 | loop 0 items  | [len] loop 1 | loop 1 items  |
//! +--------+--------------+---------------+--------------+---------------+
//! ```
//!
//! The prefix is repeated in every section. Loops are filled in order;
//! when an item no longer fits, the current section is closed (loop
//! lengths and item counts patched in) and the next one is opened with
//! every loop empty again.

use bytes::BufMut;
use log::warn;

use crate::descriptor::{descriptors_len, write_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::section::{RawSection, SectionHeader, CRC_SIZE, LONG_HEADER_SIZE};

/// Most sections one table can be split into.
pub const MAX_SECTIONS: usize = 256;

/// Where an item count lives in the per-section prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemCount {
    /// Offset of the count within the prefix.
    pub offset: usize,
    /// Width of the count in bytes (1 or 2).
    pub width: usize,
}

/// Layout of one loop in the section payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopLayout {
    /// Two-byte length field in front of the loop; the mask selects the
    /// length bits, all other bits are written as reserved ones.
    pub length_mask: Option<u16>,
    /// Count of items in this loop, patched into the prefix.
    pub count: Option<ItemCount>,
}

impl LoopLayout {
    /// Items follow the previous loop directly.
    pub const fn plain() -> Self {
        Self {
            length_mask: None,
            count: None,
        }
    }

    /// Loop preceded by a length field.
    pub const fn with_length(mask: u16) -> Self {
        Self {
            length_mask: Some(mask),
            count: None,
        }
    }

    /// Loop whose item count is stored in the prefix.
    pub const fn counted(offset: usize, width: usize) -> Self {
        Self {
            length_mask: None,
            count: Some(ItemCount { offset, width }),
        }
    }

    fn header_len(&self) -> usize {
        if self.length_mask.is_some() {
            2
        } else {
            0
        }
    }

    fn max_len(&self) -> usize {
        self.length_mask.map_or(usize::MAX, |mask| mask as usize)
    }

    fn max_items(&self) -> usize {
        match self.count {
            Some(ItemCount { width: 1, .. }) => u8::MAX as usize,
            Some(_) => u16::MAX as usize,
            None => usize::MAX,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct LoopContent {
    data: Vec<u8>,
    items: usize,
}

/// Builder that chains payload into consecutive sections.
#[derive(Debug)]
pub struct SectionChain {
    header: SectionHeader,
    capacity: usize,
    prefix: Vec<u8>,
    layout: Vec<LoopLayout>,
    active: usize,
    open: Vec<LoopContent>,
    closed: Vec<Vec<u8>>,
    full: bool,
}

impl SectionChain {
    /// Start a chain of long-form sections with one plain loop.
    ///
    /// `max_section_size` counts the whole section; the payload room is
    /// what is left after the 8-byte header and the CRC.
    pub fn new(header: SectionHeader, max_section_size: usize) -> Self {
        Self {
            header,
            capacity: max_section_size.saturating_sub(LONG_HEADER_SIZE + CRC_SIZE),
            prefix: Vec::new(),
            layout: vec![LoopLayout::plain()],
            active: 0,
            open: vec![LoopContent::default()],
            closed: Vec::new(),
            full: false,
        }
    }

    /// Bytes written at the start of every section.
    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    /// Replace the loop layout.
    pub fn with_loops(mut self, layout: &[LoopLayout]) -> Self {
        if !layout.is_empty() {
            self.layout = layout.to_vec();
            self.open = vec![LoopContent::default(); layout.len()];
        }
        self
    }

    /// Move on to the next loop. Items pushed afterwards go there.
    pub fn next_loop(&mut self) {
        if self.active + 1 < self.layout.len() {
            self.active += 1;
        }
    }

    /// Payload bytes available per section.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sections closed so far plus the open one.
    pub fn section_count(&self) -> usize {
        self.closed.len() + 1
    }

    /// Append one indivisible item to the active loop.
    ///
    /// An item too large for an empty section is still placed, alone, in
    /// a section of its own.
    pub fn push_item(&mut self, item: &[u8]) -> Result<(), PsiError> {
        if !self.make_room(item.len()) {
            return Ok(());
        }
        if !self.fits(item.len()) {
            warn!(
                "Table 0x{:02X}: {} byte item exceeds section capacity {}",
                self.header.table_id,
                item.len(),
                self.room()
            );
        }
        self.append(item)
    }

    /// Append a descriptor to the active loop.
    pub fn push_descriptor(&mut self, descriptor: &Descriptor) -> Result<(), PsiError> {
        let mut item = Vec::new();
        reserve(&mut item, descriptor.encoded_len())?;
        write_descriptor_loop(&mut item, std::slice::from_ref(descriptor));
        self.push_item(&item)
    }

    /// Append descriptors one by one, spilling into further sections.
    pub fn push_descriptors(&mut self, descriptors: &[Descriptor]) -> Result<(), PsiError> {
        for descriptor in descriptors {
            self.push_descriptor(descriptor)?;
        }
        Ok(())
    }

    /// Append an entity made of a fixed part and its descriptor loop.
    ///
    /// The last two bytes of `fixed` hold the descriptor loop length under
    /// `length_mask`; its other bits are kept. Descriptors that cannot fit
    /// even an empty section are dropped with a warning.
    pub fn push_entity(
        &mut self,
        fixed: &[u8],
        length_mask: u16,
        descriptors: &[Descriptor],
    ) -> Result<(), PsiError> {
        let total = fixed.len() + descriptors_len(descriptors);
        if !self.make_room(total) {
            return Ok(());
        }

        let room = self
            .room()
            .saturating_sub(fixed.len())
            .min(length_mask as usize);
        let mut kept = 0;
        let mut len = 0;
        for descriptor in descriptors {
            if len + descriptor.encoded_len() > room {
                break;
            }
            len += descriptor.encoded_len();
            kept += 1;
        }
        if kept < descriptors.len() {
            warn!(
                "Table 0x{:02X}: entity descriptors truncated ({} of {} kept)",
                self.header.table_id,
                kept,
                descriptors.len()
            );
        }

        let mut item = Vec::new();
        reserve(&mut item, fixed.len() + len)?;
        item.extend_from_slice(fixed);
        if item.len() >= 2 {
            let at = item.len() - 2;
            let field = u16::from_be_bytes([item[at], item[at + 1]]);
            let field = (field & !length_mask) | (len as u16 & length_mask);
            item[at..].copy_from_slice(&field.to_be_bytes());
        }
        write_descriptor_loop(&mut item, &descriptors[..kept]);

        if !self.fits(item.len()) {
            warn!(
                "Table 0x{:02X}: {} byte entity exceeds section capacity {}",
                self.header.table_id,
                item.len(),
                self.room()
            );
        }
        self.append(&item)
    }

    /// Close the last section, number every section and build them.
    pub fn finish(self) -> Result<Vec<RawSection>, PsiError> {
        self.finish_with(|_, _, _| {})
    }

    /// Like [`finish`](Self::finish), but `patch` gets each payload with
    /// its section number and the last section number before the section
    /// is built, for prefix fields that depend on the final numbering.
    pub fn finish_with<F>(mut self, mut patch: F) -> Result<Vec<RawSection>, PsiError>
    where
        F: FnMut(u8, u8, &mut [u8]),
    {
        if self.closed.is_empty() || !self.open_is_empty() {
            self.close()?;
        }

        let last = (self.closed.len() - 1) as u8;
        let mut sections = Vec::new();
        sections
            .try_reserve_exact(self.closed.len())
            .map_err(|_| {
                PsiError::AllocationFailure(
                    self.closed.len() * std::mem::size_of::<RawSection>(),
                )
            })?;

        for (number, payload) in self.closed.iter_mut().enumerate() {
            patch(number as u8, last, payload.as_mut_slice());
            let header = SectionHeader {
                section_number: number as u8,
                last_section_number: last,
                ..self.header
            };
            sections.push(RawSection::build(&header, payload.as_slice())?);
        }

        Ok(sections)
    }

    fn used(&self) -> usize {
        self.prefix.len()
            + self.layout.iter().map(LoopLayout::header_len).sum::<usize>()
            + self.open.iter().map(|l| l.data.len()).sum::<usize>()
    }

    /// Bytes still available to the active loop.
    fn room(&self) -> usize {
        let section_room = self.capacity.saturating_sub(self.used());
        let loop_room = self.layout[self.active]
            .max_len()
            .saturating_sub(self.open[self.active].data.len());
        section_room.min(loop_room)
    }

    fn fits(&self, len: usize) -> bool {
        len <= self.room()
            && self.open[self.active].items < self.layout[self.active].max_items()
    }

    fn open_is_empty(&self) -> bool {
        self.open.iter().all(|l| l.items == 0)
    }

    /// Close the open section if `len` more bytes do not fit. Returns false
    /// when the table is out of section numbers and the item is dropped.
    fn make_room(&mut self, len: usize) -> bool {
        if self.full {
            return false;
        }
        if self.fits(len) || self.open_is_empty() {
            return true;
        }
        if self.closed.len() + 1 >= MAX_SECTIONS {
            warn!(
                "Table 0x{:02X}: out of section numbers, dropping remaining items",
                self.header.table_id
            );
            self.full = true;
            return false;
        }
        match self.close() {
            Ok(()) => true,
            Err(e) => {
                warn!("Table 0x{:02X}: {}", self.header.table_id, e);
                self.full = true;
                false
            }
        }
    }

    fn append(&mut self, item: &[u8]) -> Result<(), PsiError> {
        let content = &mut self.open[self.active];
        reserve(&mut content.data, item.len())?;
        content.data.extend_from_slice(item);
        content.items += 1;
        Ok(())
    }

    /// Serialize the open section into its payload.
    fn close(&mut self) -> Result<(), PsiError> {
        let size = self.used();
        let mut payload = Vec::new();
        reserve(&mut payload, size)?;

        let mut prefix = self.prefix.clone();
        for (layout, content) in self.layout.iter().zip(&self.open) {
            if let Some(ItemCount { offset, width }) = layout.count {
                if width == 1 && offset < prefix.len() {
                    prefix[offset] = content.items as u8;
                } else if offset + 1 < prefix.len() {
                    prefix[offset..offset + 2].copy_from_slice(&(content.items as u16).to_be_bytes());
                }
            }
        }
        payload.put_slice(&prefix);

        for (layout, content) in self.layout.iter().zip(&self.open) {
            if let Some(mask) = layout.length_mask {
                payload.put_u16(!mask | (content.data.len() as u16 & mask));
            }
            payload.put_slice(&content.data);
        }

        self.closed.push(payload);
        for content in &mut self.open {
            content.data.clear();
            content.items = 0;
        }
        Ok(())
    }
}

fn reserve(buf: &mut Vec<u8>, additional: usize) -> Result<(), PsiError> {
    buf.try_reserve(additional)
        .map_err(|_| PsiError::AllocationFailure(additional))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn header() -> SectionHeader {
        SectionHeader::long(0x42, 0x0001, 7, true)
    }

    #[test]
    fn test_empty_table_has_one_section() {
        let sections = SectionChain::new(header(), 1024)
            .with_prefix(&[0xAA, 0xBB])
            .finish()
            .unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].payload(), &[0xAA, 0xBB]);
        assert_eq!(sections[0].header.last_section_number, 0);
        assert!(sections[0].is_crc_valid());
    }

    #[test]
    fn test_items_spill_into_sections() {
        // 32 byte sections leave 20 bytes: 2 prefix + 4 items of 4 bytes
        let mut chain = SectionChain::new(header(), 32).with_prefix(&[0x12, 0x34]);
        assert_eq!(chain.capacity(), 20);
        for i in 0..10u8 {
            chain.push_item(&[i, i, i, i]).unwrap();
        }
        let sections = chain.finish().unwrap();

        assert_eq!(sections.len(), 3);
        for (n, section) in sections.iter().enumerate() {
            assert_eq!(section.header.section_number, n as u8);
            assert_eq!(section.header.last_section_number, 2);
            assert_eq!(section.header.version, 7);
            assert_eq!(&section.payload()[..2], &[0x12, 0x34]);
            assert!(section.total_len() <= 32);
            assert!(section.is_crc_valid());
        }
        assert_eq!(sections[0].payload().len(), 18);
        assert_eq!(sections[2].payload().len(), 2 + 8);
    }

    #[test]
    fn test_loop_lengths_and_counts() {
        let mut chain = SectionChain::new(header(), 1024)
            .with_prefix(&[0x01, 0x00])
            .with_loops(&[
                LoopLayout::counted(1, 1),
                LoopLayout::with_length(0x03FF),
            ]);
        chain.push_item(&[0xA0, 0xA1]).unwrap();
        chain.push_item(&[0xB0]).unwrap();
        chain.next_loop();
        chain
            .push_descriptor(&Descriptor::new(0xA0, vec![0x01]))
            .unwrap();
        let sections = chain.finish().unwrap();

        assert_eq!(
            sections[0].payload(),
            &[
                0x01, 0x02, // prefix with count 2
                0xA0, 0xA1, 0xB0, // loop 0
                0xFC, 0x03, // loop 1 length 3, reserved ones
                0xA0, 0x01, 0x01,
            ]
        );
    }

    #[test]
    fn test_entity_descriptor_length_patched() {
        let mut chain = SectionChain::new(header(), 1024);
        // service_id 0x0101, flags, running_status 4 with length bits clear
        chain
            .push_entity(
                &[0x01, 0x01, 0xFD, 0x80, 0x00],
                0x0FFF,
                &[Descriptor::new(0x48, vec![0x01, 0x00, 0x00])],
            )
            .unwrap();
        let sections = chain.finish().unwrap();
        assert_eq!(
            sections[0].payload(),
            &[0x01, 0x01, 0xFD, 0x80, 0x05, 0x48, 0x03, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_oversized_entity_truncated() {
        init_logger();
        // 64 byte sections: 52 bytes of room, 5 byte fixed part
        let descriptors: Vec<_> = (0..10u8).map(|i| Descriptor::new(0x80 + i, vec![i; 8])).collect();

        let mut chain = SectionChain::new(header(), 64);
        chain.push_item(&[0xEE; 10]).unwrap();
        chain
            .push_entity(&[0x00, 0x01, 0xFC, 0xF0, 0x00], 0x0FFF, &descriptors)
            .unwrap();
        let sections = chain.finish().unwrap();

        // entity moved to a fresh section and cut to 4 descriptors (40 bytes)
        assert_eq!(sections.len(), 2);
        let payload = sections[1].payload();
        assert_eq!(payload.len(), 5 + 40);
        assert_eq!(payload[3], 0xF0);
        assert_eq!(payload[4], 40);
        assert!(sections[1].total_len() <= 64);
    }

    #[test]
    fn test_descriptors_spill() {
        let mut chain = SectionChain::new(header(), 32)
            .with_loops(&[LoopLayout::with_length(0x0FFF), LoopLayout::with_length(0x0FFF)]);
        // 20 byte room minus two length fields leaves 16 per section
        let descriptors: Vec<_> = (0..4u8).map(|i| Descriptor::new(i, vec![i; 5])).collect();
        chain.push_descriptors(&descriptors).unwrap();
        chain.next_loop();
        chain.push_item(&[0x55; 2]).unwrap();
        let sections = chain.finish().unwrap();

        assert_eq!(sections.len(), 2);
        assert_eq!(
            &sections[1].payload()[..2],
            &[0xF0, 14],
            "second section carries two descriptors"
        );
        // trailing loop length present in every section
        let first = sections[0].payload();
        assert_eq!(&first[first.len() - 2..], &[0xF0, 0x00]);
        let second = sections[1].payload();
        assert_eq!(&second[16..], &[0xF0, 0x02, 0x55, 0x55]);
    }

    #[test]
    fn test_finish_with_patches_prefix() {
        let mut chain = SectionChain::new(header(), 32).with_prefix(&[0x00]);
        for i in 0..6u8 {
            chain.push_item(&[i; 10]).unwrap();
        }
        // prefix byte carries the section's own number plus the last one
        let sections = chain
            .finish_with(|number, last, payload| payload[0] = number << 4 | last)
            .unwrap();

        assert_eq!(sections.len(), 6);
        for (n, section) in sections.iter().enumerate() {
            assert_eq!(section.payload()[0], (n as u8) << 4 | 5);
            assert!(section.is_crc_valid());
        }
    }
}
