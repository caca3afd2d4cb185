//! Concrete PSI/SI tables.
//!
//! Each table decodes from its complete set of sections and encodes back
//! through a [`SectionChain`](crate::generator::SectionChain). Descriptors
//! are kept raw.

pub mod atsc;
mod cat;
mod eit;
mod nit;
mod pat;
mod pmt;
mod sdt;
mod tdt;

pub use cat::CatTable;
pub use eit::{EitEvent, EitTable};
pub use nit::{NitTable, NitTransportStream};
pub use pat::{PatEntry, PatTable};
pub use pmt::{PmtStream, PmtTable};
pub use sdt::{SdtService, SdtTable};
pub use tdt::{TdtTable, TotTable};

use bytes::Buf;

use crate::descriptor::{parse_descriptor_loop, Descriptor};
use crate::error::PsiError;
use crate::reassembly::PsiTable;
use crate::section::RawSection;

/// Well-known PIDs.
pub mod pid {
    pub const PAT: u16 = 0x0000;
    pub const CAT: u16 = 0x0001;
    pub const NIT: u16 = 0x0010;
    pub const SDT: u16 = 0x0011;
    pub const BAT: u16 = 0x0011;
    pub const EIT: u16 = 0x0012;
    pub const TDT: u16 = 0x0014;
    pub const TOT: u16 = 0x0014;
    /// ATSC PSIP base PID (MGT, VCT, STT).
    pub const PSIP_BASE: u16 = 0x1FFB;
}

/// Table IDs.
pub mod table_id {
    pub const PAT: u8 = 0x00;
    pub const CAT: u8 = 0x01;
    pub const PMT: u8 = 0x02;
    pub const NIT_ACTUAL: u8 = 0x40;
    pub const NIT_OTHER: u8 = 0x41;
    pub const SDT_ACTUAL: u8 = 0x42;
    pub const SDT_OTHER: u8 = 0x46;
    pub const BAT: u8 = 0x4A;
    pub const EIT_PF_ACTUAL: u8 = 0x4E;
    pub const EIT_PF_OTHER: u8 = 0x4F;
    pub const EIT_SCHEDULE_ACTUAL_FIRST: u8 = 0x50;
    pub const EIT_SCHEDULE_ACTUAL_LAST: u8 = 0x5F;
    pub const EIT_SCHEDULE_OTHER_FIRST: u8 = 0x60;
    pub const EIT_SCHEDULE_OTHER_LAST: u8 = 0x6F;
    pub const TDT: u8 = 0x70;
    pub const TOT: u8 = 0x73;
    pub const ATSC_MGT: u8 = 0xC7;
    pub const ATSC_TVCT: u8 = 0xC8;
    pub const ATSC_CVCT: u8 = 0xC9;
    pub const ATSC_EIT: u8 = 0xCB;
    pub const ATSC_ETT: u8 = 0xCC;
    pub const ATSC_STT: u8 = 0xCD;
}

/// Fail with `IncompletePayload` unless `buf` holds `needed` bytes.
pub(crate) fn ensure(buf: &[u8], needed: usize) -> Result<(), PsiError> {
    if buf.len() < needed {
        return Err(PsiError::IncompletePayload {
            expected: needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Split `len` bytes off the front of `buf`.
pub(crate) fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], PsiError> {
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Read a 12-bit length-prefixed descriptor loop.
pub(crate) fn read_descriptor_loop(buf: &mut &[u8]) -> Result<Vec<Descriptor>, PsiError> {
    ensure(buf, 2)?;
    let length = (buf.get_u16() & 0x0FFF) as usize;
    parse_descriptor_loop(take(buf, length)?)
}

/// Check the sections are non-empty and all belong to `T`.
pub(crate) fn check_sections<T: PsiTable>(sections: &[RawSection]) -> Result<&RawSection, PsiError> {
    let first = sections.first().ok_or(PsiError::NoSections)?;
    for section in sections {
        if !T::accepts_table_id(section.header.table_id) {
            return Err(PsiError::UnexpectedTableId(section.header.table_id));
        }
    }
    Ok(first)
}

/// Write a 12-bit length with reserved high bits set.
pub(crate) fn length_field(len: usize) -> u16 {
    0xF000 | (len as u16 & 0x0FFF)
}
