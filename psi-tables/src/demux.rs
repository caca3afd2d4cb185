//! Subtable demultiplexer.
//!
//! Several tables share one PID (SDT actual/other, NIT actual/other, EIT
//! for every service). The demux keys each section by
//! `(table_id, extension)` and hands it to the decoder registered for that
//! key. Decoders for keys seen for the first time can be attached on the
//! fly from the `new_subtable` callback.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::PsiConfig;
use crate::decoder::{LinkedTableDecoder, TableDecoder};
use crate::error::PsiError;
use crate::reassembly::PsiTable;
use crate::section::{RawSection, SectionIter};

/// Identity of a subtable: table_id plus table_id_extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtableKey {
    /// Table ID.
    pub table_id: u8,
    /// Table ID extension.
    pub extension: u16,
}

impl SubtableKey {
    pub fn new(table_id: u8, extension: u16) -> Self {
        Self {
            table_id,
            extension,
        }
    }

    /// 24-bit composite value: `table_id << 16 | extension`.
    pub fn as_u32(&self) -> u32 {
        ((self.table_id as u32) << 16) | self.extension as u32
    }
}

impl fmt::Display for SubtableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}/0x{:04X}", self.table_id, self.extension)
    }
}

/// A decoder registered for one subtable.
pub trait SubtableDecoder {
    /// Take one CRC-checked section of this subtable.
    ///
    /// `registry` is the registry this decoder lives in. Decoders may
    /// attach or detach subtables through it, their own key included;
    /// changes are visible to the next section dispatched.
    fn gather(&mut self, section: RawSection, registry: &mut SubtableRegistry);

    /// Note a break in the carrying stream.
    fn discontinuity(&mut self);

    /// Release any state; called right before the decoder is dropped.
    fn detach(&mut self) {}
}

/// The decoder taken out of the map while it handles a section.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    key: SubtableKey,
    detached: bool,
}

/// Map of subtable keys to their decoders.
#[derive(Default)]
pub struct SubtableRegistry {
    decoders: HashMap<SubtableKey, Box<dyn SubtableDecoder>>,
    in_flight: Option<InFlight>,
}

impl SubtableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for `key`.
    pub fn attach(
        &mut self,
        key: SubtableKey,
        decoder: Box<dyn SubtableDecoder>,
    ) -> Result<(), PsiError> {
        if self.contains(key) {
            return Err(PsiError::DuplicateSubtableDecoder {
                table_id: key.table_id,
                extension: key.extension,
            });
        }

        debug!("Attached subtable decoder {}", key);
        self.decoders.insert(key, decoder);
        Ok(())
    }

    /// Register a [`TableDecoder`] for `key` that delivers `T` to
    /// `on_table`.
    pub fn attach_table<T, F>(&mut self, key: SubtableKey, on_table: F) -> Result<(), PsiError>
    where
        T: PsiTable + 'static,
        F: FnMut(T) + 'static,
    {
        self.attach(key, Box::new(TableDecoder::new(on_table)))
    }

    /// Register a [`LinkedTableDecoder`] for `key`: `on_table` also gets
    /// this registry, e.g. to attach PMT decoders from a PAT.
    pub fn attach_table_with_registry<T, F>(
        &mut self,
        key: SubtableKey,
        on_table: F,
    ) -> Result<(), PsiError>
    where
        T: PsiTable + 'static,
        F: FnMut(T, &mut SubtableRegistry) + 'static,
    {
        self.attach(key, Box::new(LinkedTableDecoder::new(on_table)))
    }

    /// Remove the decoder for `key`.
    ///
    /// A decoder detached while it is handling a section is dropped as
    /// soon as it returns.
    pub fn detach(&mut self, key: SubtableKey) -> Result<(), PsiError> {
        if let Some(in_flight) = self.in_flight.as_mut() {
            if in_flight.key == key && !in_flight.detached {
                in_flight.detached = true;
                debug!("Detached subtable decoder {} during dispatch", key);
                return Ok(());
            }
        }

        match self.decoders.remove(&key) {
            Some(mut decoder) => {
                decoder.detach();
                debug!("Detached subtable decoder {}", key);
                Ok(())
            }
            None => {
                let err = PsiError::UnknownSubtableDecoder {
                    table_id: key.table_id,
                    extension: key.extension,
                };
                warn!("{}", err);
                Err(err)
            }
        }
    }

    pub fn contains(&self, key: SubtableKey) -> bool {
        self.decoders.contains_key(&key) || self.in_flight_key() == Some(key)
    }

    pub fn len(&self) -> usize {
        self.decoders.len() + self.in_flight_key().map_or(0, |_| 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<SubtableKey> {
        let mut keys: Vec<_> = self
            .decoders
            .keys()
            .copied()
            .chain(self.in_flight_key())
            .collect();
        keys.sort();
        keys
    }

    /// Key of the decoder handling a section, unless it detached itself.
    fn in_flight_key(&self) -> Option<SubtableKey> {
        self.in_flight
            .filter(|in_flight| !in_flight.detached)
            .map(|in_flight| in_flight.key)
    }

    /// Take the decoder for `key` out of the map for one section.
    fn begin_dispatch(&mut self, key: SubtableKey) -> Option<Box<dyn SubtableDecoder>> {
        let decoder = self.decoders.remove(&key)?;
        self.in_flight = Some(InFlight {
            key,
            detached: false,
        });
        Some(decoder)
    }

    /// Put the decoder back, or drop it if it was detached meanwhile.
    fn end_dispatch(&mut self, key: SubtableKey, mut decoder: Box<dyn SubtableDecoder>) {
        let detached = self.in_flight.take().map_or(false, |f| f.detached);
        if detached {
            decoder.detach();
        } else {
            self.decoders.insert(key, decoder);
        }
    }

    fn discontinuity(&mut self) {
        for decoder in self.decoders.values_mut() {
            decoder.discontinuity();
        }
    }
}

impl fmt::Debug for SubtableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtableRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

/// What happened to a dispatched section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded to a registered decoder.
    Gathered,
    /// No decoder wanted it; discarded.
    Unregistered,
}

/// Counters for one [`Demux::feed`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSummary {
    /// Sections forwarded to a decoder.
    pub dispatched: usize,
    /// Sections with no decoder.
    pub unregistered: usize,
    /// Framing errors (at most one per buffer).
    pub malformed: usize,
    /// Sections dropped for a bad CRC.
    pub crc_errors: usize,
}

/// Callback invoked for a key with no registered decoder.
pub type NewSubtableFn = Box<dyn FnMut(&mut SubtableRegistry, SubtableKey)>;

/// Section demultiplexer for one PID.
pub struct Demux {
    registry: SubtableRegistry,
    new_subtable: NewSubtableFn,
    config: PsiConfig,
}

impl Demux {
    /// Create a demux with the default configuration.
    pub fn new<F>(new_subtable: F) -> Self
    where
        F: FnMut(&mut SubtableRegistry, SubtableKey) + 'static,
    {
        Self::with_config(PsiConfig::default(), new_subtable)
    }

    pub fn with_config<F>(config: PsiConfig, new_subtable: F) -> Self
    where
        F: FnMut(&mut SubtableRegistry, SubtableKey) + 'static,
    {
        Self {
            registry: SubtableRegistry::new(),
            new_subtable: Box::new(new_subtable),
            config,
        }
    }

    pub fn config(&self) -> &PsiConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubtableRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SubtableRegistry {
        &mut self.registry
    }

    /// Route one section to its subtable decoder, giving the
    /// `new_subtable` callback a chance to attach one first.
    pub fn push_section(&mut self, section: RawSection) -> Dispatch {
        let key = section.key();

        if !self.registry.contains(key) {
            (self.new_subtable)(&mut self.registry, key);
        }

        match self.registry.begin_dispatch(key) {
            Some(mut decoder) => {
                decoder.gather(section, &mut self.registry);
                self.registry.end_dispatch(key, decoder);
                Dispatch::Gathered
            }
            None => {
                trace!(
                    "{}, discarding section",
                    PsiError::UnregisteredSubtable {
                        table_id: key.table_id,
                        extension: key.extension,
                    }
                );
                Dispatch::Unregistered
            }
        }
    }

    /// Parse one section from `data` and dispatch it.
    ///
    /// Framing and CRC errors are returned without touching any decoder.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<Dispatch, PsiError> {
        let section = RawSection::parse(data)?;
        if self.config.verify_crc {
            section.verify_crc()?;
        }
        Ok(self.push_section(section))
    }

    /// Dispatch every section in a buffer of back-to-back sections.
    pub fn feed(&mut self, data: &[u8]) -> FeedSummary {
        let mut summary = FeedSummary::default();

        for result in SectionIter::new(data) {
            let section = match result {
                Ok(section) => section,
                Err(e) => {
                    warn!("Dropping rest of buffer: {}", e);
                    summary.malformed += 1;
                    continue;
                }
            };

            if self.config.verify_crc {
                if let Err(e) = section.verify_crc() {
                    warn!("Dropping section {}: {}", section.key(), e);
                    summary.crc_errors += 1;
                    continue;
                }
            }

            match self.push_section(section) {
                Dispatch::Gathered => summary.dispatched += 1,
                Dispatch::Unregistered => summary.unregistered += 1,
            }
        }

        summary
    }

    /// Signal a break in the carrying stream to every decoder.
    pub fn discontinuity(&mut self) {
        debug!("Discontinuity on {} subtable decoders", self.registry.len());
        self.registry.discontinuity();
    }
}

impl fmt::Debug for Demux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demux")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
