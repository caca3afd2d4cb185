//! Configuration for section handling.
//!
//! Values come from `PsiConfig::default()`, a serialized config owned by
//! the application, or the environment:
//!
//! - `PSI_VERIFY_CRC`: `0`/`false`/`no`/`off` disables CRC checking
//! - `PSI_MAX_SECTION_SIZE`: section size used when generating tables

use log::debug;
use serde::{Deserialize, Serialize};

use crate::reassembly::PsiTable;
use crate::section::PRIVATE_MAX_SECTION_SIZE;

/// Smallest section size the generator will honour.
pub const MIN_SECTION_SIZE: usize = 16;

/// Section handling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsiConfig {
    /// Drop sections whose CRC-32 does not check out.
    pub verify_crc: bool,
    /// Override for the generated section size. `None` uses the table
    /// kind's own limit.
    pub max_section_size: Option<usize>,
}

impl Default for PsiConfig {
    fn default() -> Self {
        Self {
            verify_crc: true,
            max_section_size: None,
        }
    }
}

impl PsiConfig {
    /// Load configuration from `PSI_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let verify_crc = lookup("PSI_VERIFY_CRC")
            .map(|s| {
                let lower = s.trim().to_lowercase();
                !(lower == "0" || lower == "false" || lower == "no" || lower == "off")
            })
            .unwrap_or(defaults.verify_crc);

        let max_section_size = lookup("PSI_MAX_SECTION_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .or(defaults.max_section_size);

        debug!(
            "Using environment/default config: verify_crc={}, max_section_size={:?}",
            verify_crc, max_section_size
        );

        Self {
            verify_crc,
            max_section_size,
        }
    }

    /// Section size to generate `T` with: the override when set, never
    /// above the table kind's limit and never below [`MIN_SECTION_SIZE`].
    pub fn section_size_for<T: PsiTable>(&self) -> usize {
        clamp_section_size::<T>(self.max_section_size.unwrap_or(usize::MAX))
    }
}

/// Clamp a requested section size into `MIN_SECTION_SIZE..=T::MAX_SECTION_SIZE`.
pub fn clamp_section_size<T: PsiTable>(requested: usize) -> usize {
    requested
        .min(T::MAX_SECTION_SIZE.min(PRIVATE_MAX_SECTION_SIZE))
        .max(MIN_SECTION_SIZE)
}
