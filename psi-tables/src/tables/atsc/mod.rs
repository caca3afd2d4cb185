//! ATSC PSIP tables (A/65).
//!
//! All PSIP tables start their payload with `protocol_version` and use
//! private sections of up to 4096 bytes.

mod eit;
mod ett;
mod mgt;
mod stt;
mod vct;

pub use eit::{AtscEitEvent, AtscEitTable};
pub use ett::EttTable;
pub use mgt::{MgtEntry, MgtTable};
pub use stt::SttTable;
pub use vct::{VctChannel, VctTable};

use crate::error::PsiError;
use crate::section::RawSection;

use super::ensure;

/// `protocol_version` of the first section.
pub(crate) fn protocol_version(section: &RawSection) -> Result<u8, PsiError> {
    let payload = section.payload();
    ensure(payload, 1)?;
    Ok(payload[0])
}
