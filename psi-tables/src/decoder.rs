//! Table decoder: a reassembler wired to a "table ready" callback.

use std::fmt;

use crate::config::PsiConfig;
use crate::demux::{SubtableDecoder, SubtableRegistry};
use crate::error::PsiError;
use crate::reassembly::{PsiTable, TableReassembler};
use crate::section::RawSection;

/// Reassembles one subtable and hands each new table to `on_table`.
///
/// Registered in a [`SubtableRegistry`](crate::demux::SubtableRegistry)
/// or used on its own for PIDs that only carry one table (PAT on PID 0).
pub struct TableDecoder<T, F> {
    reassembler: TableReassembler<T>,
    on_table: F,
    verify_crc: bool,
}

impl<T, F> TableDecoder<T, F>
where
    T: PsiTable,
    F: FnMut(T),
{
    pub fn new(on_table: F) -> Self {
        Self::with_config(&PsiConfig::default(), on_table)
    }

    pub fn with_config(config: &PsiConfig, on_table: F) -> Self {
        Self {
            reassembler: TableReassembler::new(),
            on_table,
            verify_crc: config.verify_crc,
        }
    }

    /// Take one section that has already been checked. Returns true if a
    /// table was delivered.
    pub fn push_section(&mut self, section: RawSection) -> bool {
        match self.reassembler.push(section) {
            Some(table) => {
                (self.on_table)(table);
                true
            }
            None => false,
        }
    }

    /// Parse and check one section, then push it.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<bool, PsiError> {
        let section = RawSection::parse(data)?;
        if self.verify_crc {
            section.verify_crc()?;
        }
        Ok(self.push_section(section))
    }

    pub fn reassembler(&self) -> &TableReassembler<T> {
        &self.reassembler
    }

    /// Forget the partial table and the delivered version.
    pub fn reset(&mut self) {
        self.reassembler.reset();
    }
}

impl<T, F> SubtableDecoder for TableDecoder<T, F>
where
    T: PsiTable,
    F: FnMut(T),
{
    fn gather(&mut self, section: RawSection, _registry: &mut SubtableRegistry) {
        self.push_section(section);
    }

    fn discontinuity(&mut self) {
        self.reassembler.set_discontinuity();
    }

    fn detach(&mut self) {
        self.reassembler.reset();
    }
}

impl<T, F> fmt::Debug for TableDecoder<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDecoder")
            .field("reassembler", &self.reassembler)
            .field("verify_crc", &self.verify_crc)
            .finish()
    }
}

/// Registered decoder whose callback also gets the registry.
///
/// Lets a table attach decoders for the subtables it announces (SDT
/// services to their EIT, PAT programs to their PMT) or detach itself,
/// all within the dispatch that delivered it.
pub struct LinkedTableDecoder<T, F> {
    reassembler: TableReassembler<T>,
    on_table: F,
}

impl<T, F> LinkedTableDecoder<T, F>
where
    T: PsiTable,
    F: FnMut(T, &mut SubtableRegistry),
{
    pub fn new(on_table: F) -> Self {
        Self {
            reassembler: TableReassembler::new(),
            on_table,
        }
    }

    pub fn reassembler(&self) -> &TableReassembler<T> {
        &self.reassembler
    }
}

impl<T, F> SubtableDecoder for LinkedTableDecoder<T, F>
where
    T: PsiTable,
    F: FnMut(T, &mut SubtableRegistry),
{
    fn gather(&mut self, section: RawSection, registry: &mut SubtableRegistry) {
        if let Some(table) = self.reassembler.push(section) {
            (self.on_table)(table, registry);
        }
    }

    fn discontinuity(&mut self) {
        self.reassembler.set_discontinuity();
    }

    fn detach(&mut self) {
        self.reassembler.reset();
    }
}

impl<T, F> fmt::Debug for LinkedTableDecoder<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedTableDecoder")
            .field("reassembler", &self.reassembler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::section::SectionHeader;
    use crate::tables::{table_id, CatTable, PatEntry, PatTable};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// CAT sections 0..=2, version 3, two descriptors in section 0.
    fn cat_sections() -> Vec<Vec<u8>> {
        let payloads: [&[u8]; 3] = [
            &[
                0x09, 0x04, 0x00, 0x05, 0xE1, 0x00, // CA descriptor, system 0x0005 on PID 0x0100
                0x09, 0x04, 0x18, 0x00, 0xE2, 0x00, // CA descriptor, system 0x1800 on PID 0x0200
            ],
            &[],
            &[],
        ];

        payloads
            .iter()
            .enumerate()
            .map(|(n, payload)| {
                let mut header = SectionHeader::long(table_id::CAT, 0xFFFF, 3, true);
                header.section_number = n as u8;
                header.last_section_number = 2;
                RawSection::build(&header, payload)
                    .unwrap()
                    .as_bytes()
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn test_three_section_table_any_order() {
        init_logger();
        for order in [[0usize, 1, 2], [2, 1, 0], [1, 0, 2]] {
            let sections = cat_sections();
            let mut tables = Vec::new();
            let mut decoder = TableDecoder::new(|cat: CatTable| tables.push(cat));

            let mut fired = Vec::new();
            for &n in &order {
                fired.push(decoder.push_bytes(&sections[n]).unwrap());
            }
            assert_eq!(fired, vec![false, false, true]);
            drop(decoder);

            assert_eq!(tables.len(), 1);
            let cat = &tables[0];
            assert_eq!(cat.version_number, 3);
            assert!(cat.current_next_indicator);
            assert_eq!(
                cat.descriptors,
                vec![
                    Descriptor::new(0x09, vec![0x00, 0x05, 0xE1, 0x00]),
                    Descriptor::new(0x09, vec![0x18, 0x00, 0xE2, 0x00]),
                ]
            );
        }
    }

    #[test]
    fn test_corrupted_section_then_resend() {
        init_logger();
        let sections = cat_sections();
        let mut corrupted = sections[1].clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x5A;

        let mut count = 0;
        let mut decoder = TableDecoder::new(|_: CatTable| count += 1);

        decoder.push_bytes(&sections[0]).unwrap();
        assert!(matches!(
            decoder.push_bytes(&corrupted),
            Err(PsiError::CrcMismatch { .. })
        ));
        assert_eq!(decoder.push_bytes(&sections[2]), Ok(false));
        assert!(decoder.reassembler().is_building());

        // corrected section 1 completes the table
        assert_eq!(decoder.push_bytes(&sections[1]), Ok(true));
        drop(decoder);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_standalone_pat() {
        let pat = PatTable {
            transport_stream_id: 0x7FE1,
            version_number: 1,
            current_next_indicator: true,
            programs: vec![
                PatEntry {
                    program_number: 0,
                    pid: 0x0010,
                },
                PatEntry {
                    program_number: 0x0400,
                    pid: 0x01F0,
                },
            ],
        };

        let mut received = None;
        let mut decoder = TableDecoder::new(|t: PatTable| received = Some(t));
        for section in pat.encode(1024).unwrap() {
            decoder.push_section(section);
        }
        drop(decoder);
        assert_eq!(received, Some(pat));
    }

    #[test]
    fn test_subtable_decoder_hooks() {
        let mut count = 0;
        {
            let mut decoder = TableDecoder::new(|_: CatTable| count += 1);
            let sections = cat_sections();

            decoder.push_bytes(&sections[0]).unwrap();
            SubtableDecoder::discontinuity(&mut decoder);
            decoder.push_bytes(&sections[1]).unwrap();
            decoder.push_bytes(&sections[2]).unwrap();
            assert!(decoder.reassembler().is_building());

            SubtableDecoder::detach(&mut decoder);
            assert!(!decoder.reassembler().is_building());
        }
        assert_eq!(count, 0);
    }
}
