//! Multi-section table reassembly.
//!
//! A table is broadcast as up to 256 sections sharing one identity
//! (table_id, extension, version, last_section_number). The
//! [`TableReassembler`] collects them into slots until the table is
//! complete, decodes it once and then ignores repeats of the same
//! version until the version or current/next indicator changes.
//!
//! Everything table specific lives in the [`PsiTable`] implementation:
//! which table_ids it takes, how strictly sections are compared, whether
//! sections may be left out (segmented schedule tables) and the byte
//! layout itself.

use std::fmt;
use std::marker::PhantomData;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::PsiConfig;
use crate::error::PsiError;
use crate::section::RawSection;

/// Number of sections that make up one segment of a schedule table.
pub const SEGMENT_SIZE: usize = 8;

/// How a table decides it has all its sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    /// Every section `0..=last_section_number` must be present.
    AllSections,
    /// Sections past a segment's declared last section may be missing.
    Segmented,
}

/// A table kind that can be reassembled from and split into sections.
pub trait PsiTable: Sized {
    /// Short name for log messages.
    const NAME: &'static str;

    /// Largest section this table kind may use, header and CRC included.
    const MAX_SECTION_SIZE: usize;

    const COMPLETION: Completion = Completion::AllSections;

    /// Ignore repeats of the version already delivered. Tables carrying a
    /// clock under a fixed version turn this off.
    const SUPPRESS_DUPLICATES: bool = true;

    /// Returns true if sections with this table_id belong to this kind.
    fn accepts_table_id(table_id: u8) -> bool;

    /// Returns true if `section` belongs to the same table as `first`.
    fn identity_matches(first: &RawSection, section: &RawSection) -> bool {
        header_identity_matches(first, section)
    }

    /// `segment_last_section_number` carried by a section of a segmented
    /// table.
    fn segment_last_section_number(_section: &RawSection) -> Option<u8> {
        None
    }

    /// Decode a complete table from its sections in ascending order.
    fn decode(sections: &[RawSection]) -> Result<Self, PsiError>;

    /// Split the table into sections of at most `max_section_size` bytes.
    /// The size is clamped to `MAX_SECTION_SIZE` and to
    /// [`MIN_SECTION_SIZE`](crate::config::MIN_SECTION_SIZE).
    fn encode(&self, max_section_size: usize) -> Result<Vec<RawSection>, PsiError>;

    /// Encode with the section size `config` picks for this table kind.
    fn encode_with(&self, config: &PsiConfig) -> Result<Vec<RawSection>, PsiError> {
        self.encode(config.section_size_for::<Self>())
    }
}

/// Compare table_id, extension, version and last_section_number.
pub fn header_identity_matches(first: &RawSection, section: &RawSection) -> bool {
    let a = &first.header;
    let b = &section.header;
    a.table_id == b.table_id
        && a.extension == b.extension
        && a.version == b.version
        && a.last_section_number == b.last_section_number
}

/// The table being built.
#[derive(Debug, Clone)]
struct Building {
    /// First section received, reference for identity checks.
    first: RawSection,
    /// Section number of `first`.
    first_received: u8,
    /// A section numbered below `first_received` has arrived.
    wrapped: bool,
}

/// Reassembly state for one subtable.
pub struct TableReassembler<T> {
    building: Option<Building>,
    slots: Vec<Option<RawSection>>,
    current: Option<(u8, bool)>,
    discontinuity: bool,
    _table: PhantomData<fn() -> T>,
}

impl<T> Default for TableReassembler<T> {
    fn default() -> Self {
        Self {
            building: None,
            slots: Vec::new(),
            current: None,
            discontinuity: false,
            _table: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TableReassembler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReassembler")
            .field("building", &self.building.as_ref().map(|b| b.first.key()))
            .field("received", &self.slots.iter().flatten().count())
            .field("current", &self.current)
            .field("discontinuity", &self.discontinuity)
            .finish()
    }
}

impl<T: PsiTable> TableReassembler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one section. Returns the table when this section completes it.
    ///
    /// Sections are expected to be CRC-checked already.
    pub fn push(&mut self, section: RawSection) -> Option<T> {
        let header = section.header;

        if !T::accepts_table_id(header.table_id) {
            warn!(
                "{}: {}",
                T::NAME,
                PsiError::UnexpectedTableId(header.table_id)
            );
            return None;
        }

        if header.section_number > header.last_section_number {
            warn!(
                "{} {}: section_number {} past last_section_number {}",
                T::NAME,
                section.key(),
                header.section_number,
                header.last_section_number
            );
            return None;
        }

        if self.discontinuity {
            if self.building.is_some() {
                debug!("{} {}: discontinuity, dropping partial table", T::NAME, section.key());
            }
            self.clear_building();
            self.discontinuity = false;
        }

        if let Some(building) = &self.building {
            if !T::identity_matches(&building.first, &section) {
                warn!(
                    "{}, reinitializing",
                    PsiError::IdentityInconsistency {
                        table_id: header.table_id,
                        extension: header.extension,
                    }
                );
                self.clear_building();
            }
        }

        if self.building.is_none() {
            if T::SUPPRESS_DUPLICATES && self.current == Some((header.version, header.current_next))
            {
                trace!(
                    "{} {}: version {} already delivered",
                    T::NAME,
                    section.key(),
                    header.version
                );
                return None;
            }

            if let Err(e) = self.start(&section) {
                warn!("{} {}: {}", T::NAME, section.key(), e);
                return None;
            }
        }

        let number = header.section_number;
        let building = self.building.as_mut()?;
        if number < building.first_received {
            building.wrapped = true;
        }
        self.slots[number as usize] = Some(section);

        if self.is_complete(number) {
            self.complete()
        } else {
            None
        }
    }

    /// `(version, current_next)` of the last delivered table.
    pub fn current_version(&self) -> Option<(u8, bool)> {
        self.current
    }

    /// Returns true while sections of a table are being collected.
    pub fn is_building(&self) -> bool {
        self.building.is_some()
    }

    /// Raise the discontinuity flag: the partial table is dropped on the
    /// next section.
    pub fn set_discontinuity(&mut self) {
        self.discontinuity = true;
    }

    pub fn has_discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Forget everything, including the delivered version.
    pub fn reset(&mut self) {
        self.clear_building();
        self.current = None;
        self.discontinuity = false;
    }

    fn clear_building(&mut self) {
        self.building = None;
        self.slots.clear();
    }

    fn start(&mut self, section: &RawSection) -> Result<(), PsiError> {
        let count = section.header.last_section_number as usize + 1;

        let mut slots = Vec::new();
        slots.try_reserve_exact(count).map_err(|_| {
            PsiError::AllocationFailure(count * std::mem::size_of::<Option<RawSection>>())
        })?;
        slots.resize(count, None);

        self.slots = slots;
        self.building = Some(Building {
            first: section.clone(),
            first_received: section.header.section_number,
            wrapped: false,
        });
        Ok(())
    }

    fn is_complete(&self, incoming: u8) -> bool {
        let Some(building) = &self.building else {
            return false;
        };

        match T::COMPLETION {
            Completion::AllSections => self.slots.iter().all(Option::is_some),
            Completion::Segmented => {
                let due = if building.first_received == 0 {
                    incoming == building.first.header.last_section_number
                } else {
                    building.wrapped
                };
                due && (0..self.slots.len()).all(|i| self.slots[i].is_some() || self.gap_declared(i))
            }
        }
    }

    /// An empty slot is fine only in the unused tail of its segment: no
    /// later section of the segment was received, and a section of the
    /// segment declares the segment ends before it.
    fn gap_declared(&self, index: usize) -> bool {
        let start = index / SEGMENT_SIZE * SEGMENT_SIZE;
        let end = (start + SEGMENT_SIZE).min(self.slots.len());

        if self.slots[index + 1..end].iter().any(Option::is_some) {
            return false;
        }

        self.slots[start..index]
            .iter()
            .flatten()
            .filter_map(T::segment_last_section_number)
            .any(|segment_last| (segment_last as usize) < index)
    }

    fn complete(&mut self) -> Option<T> {
        let building = self.building.take()?;
        let sections: Vec<RawSection> = std::mem::take(&mut self.slots)
            .into_iter()
            .flatten()
            .collect();

        let key = building.first.key();
        match T::decode(&sections) {
            Ok(table) => {
                let header = building.first.header;
                self.current = Some((header.version, header.current_next));
                debug!(
                    "{} {}: version {} complete ({} sections)",
                    T::NAME,
                    key,
                    header.version,
                    sections.len()
                );
                Some(table)
            }
            Err(e) => {
                warn!("{} {}: failed to decode: {}", T::NAME, key, e);
                None
            }
        }
    }
}
