//! LXT2 trace writer
//!
//! A [`Trace`] owns everything needed to write one logical trace: the
//! signal table, the two section dictionaries, the granule clock and the
//! output part currently being written.
//!
//! ## Lifecycle
//!
//! ```text
//! create ─► add / alias ─► first emit (directory frozen)
//!                               │
//!         set_time ─► emit_* ───┤  64 time slots ─► granule block
//!                               │  max_granule granules ─► section trailer
//!                               ▼
//!                          flush / close
//! ```
//!
//! Calls are made from one thread in simulated-time order; see
//! [`crate::worker`] for moving the encoding off the caller's thread.

mod emit;
mod section;

pub use emit::Emitted;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{normalize_initial_value, PartialMode, TraceConfig};
use crate::dictionary::{MapDictionary, StringDictionary};
use crate::error::{Lxt2Error, Result};
use crate::format::{SignalFlags, GRANULE_SIZE, HEADER_ID, VERSION};
use crate::output::Output;
use crate::signal::{Signal, SignalId};
use crate::storage::{FileStorage, StorageBackend};
use crate::table::SignalTable;

/// Time bookkeeping for the open granule and section
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    pub timeset: bool,
    /// Latest time accepted
    pub maxtime: u64,
    pub firsttime: u64,
    pub lasttime: u64,
    /// Slot of the open granule that changes are recorded into
    pub timepos: usize,
    /// Granules already written in the open section
    pub timegranule: u32,
    pub timetable: [u64; GRANULE_SIZE],
    /// A change was recorded since the last time advance
    pub bumptime: bool,
    /// A finalizing flush happened at `flushtime` and nothing moved since
    pub flush_valid: bool,
    pub flushtime: u64,
    pub granule_dirty: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Clock {
            timeset: false,
            maxtime: 0,
            firsttime: 0,
            lasttime: 0,
            timepos: 0,
            timegranule: 0,
            timetable: [0; GRANULE_SIZE],
            bumptime: false,
            flush_valid: false,
            flushtime: 0,
            granule_dirty: false,
        }
    }
}

impl Clock {
    /// Slots and granules are both at zero: the next slot opens a section
    pub fn at_section_start(&self) -> bool {
        self.timepos == 0 && self.timegranule == 0
    }
}

/// Counters describing a trace so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats {
    /// Root signals registered
    pub signals: usize,
    /// Aliases registered
    pub aliases: usize,
    /// Granule blocks written
    pub granules_flushed: u64,
    /// Sections finalized with a dictionary trailer
    pub sections_closed: u64,
    /// Parts written, counting the primary file
    pub file_parts: u32,
    /// String dictionary entries written across all trailers
    pub dictionary_entries: u64,
    /// Map dictionary entries written across all trailers
    pub map_entries: u64,
    /// Latest time set
    pub last_time: u64,
    /// Write failures seen
    pub io_errors: u64,
    /// Size fields left unpatched because a write failure lost their
    /// offsets
    pub unpatched_fields: u64,
}

/// Streaming LXT2 writer
pub struct Trace {
    pub(crate) config: TraceConfig,
    pub(crate) storage: Box<dyn StorageBackend>,
    pub(crate) out: Output,
    pub(crate) table: SignalTable,
    pub(crate) strings: StringDictionary,
    pub(crate) maps: MapDictionary,
    pub(crate) clock: Clock,
    /// Directory written; registration closed
    pub(crate) emitted: bool,
    pub(crate) blackout: bool,
    /// Length of the header copied into break files; unknown after a
    /// write failure during the directory
    pub(crate) break_header_size: Option<u64>,
    pub(crate) break_number: u32,
    pub(crate) section_start: Option<u64>,
    pub(crate) zcount_cumulative: u64,
    pub(crate) stats: TraceStats,
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("backend", &self.storage.name())
            .field("config", &self.config)
            .field("signals", &self.table.len())
            .field("emitted", &self.emitted)
            .field("blackout", &self.blackout)
            .field("time", &self.clock.maxtime)
            .finish()
    }
}

impl Trace {
    /// Create `path` with the default configuration
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, TraceConfig::default())
    }

    pub fn create_with_config<P: AsRef<Path>>(path: P, config: TraceConfig) -> Result<Self> {
        Self::with_storage(FileStorage::new(path.as_ref()), config)
    }

    /// Open part 0 of `storage` and write the file header
    pub fn with_storage<S>(storage: S, config: TraceConfig) -> Result<Self>
    where
        S: StorageBackend + 'static,
    {
        config.validate()?;
        let stream = storage.create(0)?;
        let mut out = Output::new(stream);
        out.put_u16(HEADER_ID);
        out.put_u16(VERSION);
        out.put_u8(GRANULE_SIZE as u8);
        if let Some(err) = out.take_first_fault() {
            return Err(err.into());
        }

        tracing::info!(
            backend = storage.name(),
            part = %storage.part_name(0),
            depth = config.compression_depth,
            "trace opened"
        );

        Ok(Trace {
            config,
            storage: Box::new(storage),
            out,
            table: SignalTable::new(),
            strings: StringDictionary::new(),
            maps: MapDictionary::new(),
            clock: Clock::default(),
            emitted: false,
            blackout: false,
            break_header_size: None,
            break_number: 0,
            section_start: None,
            zcount_cumulative: 0,
            stats: TraceStats {
                file_parts: 1,
                ..TraceStats::default()
            },
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Deflate level for sections started from now on
    pub fn set_compression_depth(&mut self, depth: u32) {
        self.config.compression_depth = depth.min(9);
    }

    /// Granules per section; 0 is unbounded
    pub fn set_max_granule(&mut self, max_granule: u32) {
        self.config.max_granule = max_granule;
    }

    pub fn set_break_size(&mut self, bytes: u64) {
        self.config.break_size = bytes;
    }

    pub fn set_checkpoint(&mut self, enabled: bool) {
        self.config.checkpoint = enabled;
    }

    /// Turn on vertical partials; ignored once the directory is written
    pub fn set_partial_on(&mut self, zip: bool) {
        if self.ignore_after_freeze("partial mode") {
            return;
        }
        self.config.partial = Some(PartialMode {
            zip,
            ..PartialMode::default()
        });
    }

    pub fn set_partial_off(&mut self) {
        if self.ignore_after_freeze("partial mode") {
            return;
        }
        self.config.partial = None;
    }

    /// Move `name`'s root into the first partial group.
    ///
    /// Returns false for unknown names or after the directory is written.
    pub fn set_partial_preference(&mut self, name: &str) -> bool {
        self.table.set_partial_preference(name)
    }

    /// Fill character for signals added from now on
    pub fn set_initial_value(&mut self, value: char) {
        if self.ignore_after_freeze("initial value") {
            return;
        }
        self.config.initial_value = normalize_initial_value(value);
    }

    pub fn set_bracket_stripping(&mut self, strip: bool) {
        if self.ignore_after_freeze("bracket stripping") {
            return;
        }
        self.config.strip_brackets = strip;
    }

    /// Time unit as a power of ten seconds
    pub fn set_timescale(&mut self, exponent: i8) {
        if self.ignore_after_freeze("timescale") {
            return;
        }
        self.config.timescale = exponent;
    }

    pub fn set_timezero(&mut self, offset: i64) {
        if self.ignore_after_freeze("timezero") {
            return;
        }
        self.config.timezero = offset;
    }

    fn ignore_after_freeze(&self, setting: &str) -> bool {
        if self.emitted {
            tracing::debug!(setting, "ignored: directory already written");
        }
        self.emitted
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Signal registration
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a signal.
    ///
    /// Bit-vectors span `msb..lsb`; integer, double and string signals
    /// ignore the range. Fails once the directory is written, for a name
    /// already in use, or when more than one value kind is requested.
    pub fn add(
        &mut self,
        name: &str,
        rows: u32,
        msb: i32,
        lsb: i32,
        flags: SignalFlags,
    ) -> Result<SignalId> {
        let initial = self.config.initial_byte();
        self.table.add(name, rows, msb, lsb, flags, initial)
    }

    /// Register `alias` for `existing`; a bit-vector alias must span the
    /// root's width.
    pub fn alias(&mut self, existing: &str, alias: &str, msb: i32, lsb: i32) -> Result<SignalId> {
        self.table.alias(existing, alias, msb, lsb)
    }

    pub fn find(&self, name: &str) -> Option<SignalId> {
        self.table.find(name)
    }

    pub fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.table.get(id)
    }

    pub fn signals(&self) -> &SignalTable {
        &self.table
    }

    /// True once the directory is written and registration is closed
    pub fn is_frozen(&self) -> bool {
        self.emitted
    }

    pub fn in_blackout(&self) -> bool {
        self.blackout
    }

    /// Write the directory if this is the first emission of any kind
    pub(crate) fn ensure_frozen(&mut self) {
        if self.emitted {
            return;
        }
        self.table.freeze(self.config.strip_brackets);
        self.break_header_size =
            crate::directory::write_directory(&mut self.out, &self.table, &self.config);
        self.emitted = true;

        if !self.clock.timeset {
            // Time 0 cannot recede, so this never fails.
            let _ = self.set_time64(0);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Time
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_time(&mut self, time: u32) -> Result<()> {
        self.set_time64(u64::from(time))
    }

    /// Advance to `time`.
    ///
    /// A time equal to the current one is accepted and changes nothing; an
    /// earlier time is rejected.
    pub fn set_time64(&mut self, time: u64) -> Result<()> {
        if self.clock.timeset {
            if time < self.clock.maxtime {
                return Err(Lxt2Error::TimeWentBackwards {
                    requested: time,
                    current: self.clock.maxtime,
                });
            }
            if time > self.clock.maxtime {
                if self.clock.bumptime {
                    self.clock.bumptime = false;
                    if self.clock.flush_valid {
                        self.clock.flush_valid = false;
                    } else {
                        self.clock.timepos += 1;
                    }
                    if self.clock.timepos == GRANULE_SIZE {
                        self.flush_granule(false);
                    }
                }
                self.clock.timetable[self.clock.timepos] = time;
                self.clock.lasttime = time;
                self.clock.maxtime = time;
            }
        } else {
            self.clock.timeset = true;
            self.clock.maxtime = time;
            self.clock.timetable[self.clock.timepos] = time;
        }

        if self.clock.at_section_start() {
            self.clock.firsttime = time;
            self.clock.lasttime = time;
            if self.stats.sections_closed == 0 || self.config.checkpoint {
                self.checkpoint_burst();
            }
        }

        self.clock.granule_dirty = true;
        self.stats.last_time = self.clock.maxtime;
        Ok(())
    }

    /// Advance by `delta` from the latest time
    pub fn inc_time_by_delta(&mut self, delta: u32) -> Result<()> {
        self.inc_time_by_delta64(u64::from(delta))
    }

    pub fn inc_time_by_delta64(&mut self, delta: u64) -> Result<()> {
        self.set_time64(self.clock.maxtime.saturating_add(delta))
    }

    /// Latest time set (0 before any)
    pub fn current_time(&self) -> u64 {
        self.clock.maxtime
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Flush and close
    // ═══════════════════════════════════════════════════════════════════════

    /// Write out the open granule and close the section if anything is
    /// pending since the last flush
    pub fn flush(&mut self) {
        let started = self.clock.timegranule > 0 || self.clock.timepos > 0;
        if started && self.clock.granule_dirty {
            self.clock.timepos += 1;
            self.flush_granule(true);
        }
    }

    /// Finish the trace and release the output.
    ///
    /// Returns the final counters, or the first write failure seen over
    /// the life of the trace.
    pub fn close(mut self) -> Result<TraceStats> {
        if !self.emitted && !self.table.is_empty() {
            self.ensure_frozen();
        }
        if self.clock.granule_dirty {
            self.clock.timepos += 1;
            self.flush_granule(true);
        }
        self.out.finish();

        let stats = self.stats();
        tracing::info!(
            sections = stats.sections_closed,
            granules = stats.granules_flushed,
            parts = stats.file_parts,
            io_errors = stats.io_errors,
            "trace closed"
        );
        match self.out.take_first_fault() {
            Some(err) => Err(err.into()),
            None => Ok(stats),
        }
    }

    pub fn stats(&self) -> TraceStats {
        TraceStats {
            signals: self.table.len() - self.table.alias_count(),
            aliases: self.table.alias_count(),
            io_errors: self.out.fault_count(),
            ..self.stats.clone()
        }
    }
}
