//! Error types for PSI/SI section handling.

use thiserror::Error;

/// Errors raised while framing, reassembling or generating PSI sections.
///
/// Per-section errors (`MalformedSection`, `CrcMismatch`,
/// `IdentityInconsistency`, `UnregisteredSubtable`) never abort a stream:
/// the offending section is dropped and processing continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PsiError {
    /// Declared section length does not fit the supplied buffer.
    #[error("Malformed section: declared {declared} bytes, {available} available")]
    MalformedSection { declared: usize, available: usize },

    /// CRC-32 over the section did not come out to zero.
    #[error("CRC-32 mismatch (section carries 0x{crc:08X})")]
    CrcMismatch { crc: u32 },

    /// A section disagreed with the table being assembled.
    #[error("Inconsistent section for table 0x{table_id:02X}/0x{extension:04X}")]
    IdentityInconsistency { table_id: u8, extension: u16 },

    /// No decoder wanted this subtable.
    #[error("No decoder for subtable 0x{table_id:02X}/0x{extension:04X}")]
    UnregisteredSubtable { table_id: u8, extension: u16 },

    /// A decoder is already attached for this key.
    #[error("Subtable decoder 0x{table_id:02X}/0x{extension:04X} already attached")]
    DuplicateSubtableDecoder { table_id: u8, extension: u16 },

    /// No decoder is attached for this key.
    #[error("Subtable decoder 0x{table_id:02X}/0x{extension:04X} is not attached")]
    UnknownSubtableDecoder { table_id: u8, extension: u16 },

    /// Buffer reservation failed.
    #[error("Failed to allocate {0} bytes")]
    AllocationFailure(usize),

    /// Payload does not fit in the 12-bit section length field.
    #[error("Section too long: {len} bytes (max: {max})")]
    SectionTooLong { len: usize, max: usize },

    /// Table payload ended before a field or loop did.
    #[error("Incomplete payload: expected {expected} bytes, got {actual}")]
    IncompletePayload { expected: usize, actual: usize },

    /// Section table_id does not belong to the table kind decoding it.
    #[error("Unexpected table_id: 0x{0:02X}")]
    UnexpectedTableId(u8),

    /// Decode was called without any section.
    #[error("No sections to decode")]
    NoSections,
}

impl PsiError {
    /// Returns true for errors local to a single section, which only cost
    /// that section and leave decoder state untouched.
    pub fn is_per_section(&self) -> bool {
        matches!(
            self,
            PsiError::MalformedSection { .. }
                | PsiError::CrcMismatch { .. }
                | PsiError::IdentityInconsistency { .. }
                | PsiError::UnregisteredSubtable { .. }
                | PsiError::IncompletePayload { .. }
                | PsiError::UnexpectedTableId(_)
        )
    }
}
