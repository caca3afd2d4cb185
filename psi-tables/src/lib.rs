//! PSI/SI table handling for MPEG-2 transport streams.
//!
//! This crate turns the sections carried on a PID into typed tables and
//! back again. It covers the MPEG-2 PSI tables, the DVB SI tables and the
//! ATSC PSIP tables.
//!
//! # Section Format
//!
//! ```text
//! +----------+---------------+-----------+---------------------+---------+---------+
//! | table_id | flags, length | extension | ver/cn, sn, last_sn | payload |  CRC32  |
//! |  8 bits  |    16 bits    |  16 bits  |       24 bits       |   ...   | 32 bits |
//! +----------+---------------+-----------+---------------------+---------+---------+
//! ```
//!
//! Short-form sections (`section_syntax_indicator = 0`) stop after the
//! 3-byte header and carry no CRC.
//!
//! # Layers
//!
//! - [`RawSection`] / [`SectionIter`]: framing and CRC checking
//! - [`Demux`]: routes sections to per-subtable decoders by
//!   (table_id, table_id_extension)
//! - [`TableReassembler`]: collects the sections of one table version
//! - [`SectionChain`]: splits a table back into sections
//!
//! # Example
//!
//! ```rust
//! use psi_tables::tables::{PatEntry, PatTable};
//! use psi_tables::{PsiTable, TableDecoder};
//!
//! let pat = PatTable {
//!     transport_stream_id: 0x7FE0,
//!     version_number: 1,
//!     current_next_indicator: true,
//!     programs: vec![PatEntry { program_number: 0x0400, pid: 0x01F0 }],
//! };
//! let sections = pat.encode(1024).unwrap();
//!
//! let mut received = Vec::new();
//! let mut decoder = TableDecoder::new(|table: PatTable| received.push(table));
//! for section in &sections {
//!     decoder.push_bytes(section.as_bytes()).unwrap();
//! }
//! drop(decoder);
//!
//! assert_eq!(received, vec![pat]);
//! ```

pub mod config;
pub mod crc32;
pub mod decoder;
pub mod demux;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod reassembly;
pub mod section;
pub mod tables;
pub mod time;

pub use config::PsiConfig;
pub use crc32::crc32_mpeg2;
pub use decoder::{LinkedTableDecoder, TableDecoder};
pub use demux::{Demux, Dispatch, FeedSummary, SubtableDecoder, SubtableKey, SubtableRegistry};
pub use descriptor::{Descriptor, DescriptorCodec};
pub use error::PsiError;
pub use generator::{LoopLayout, SectionChain};
pub use reassembly::{Completion, PsiTable, TableReassembler};
pub use section::{RawSection, SectionHeader, SectionIter};
