//! Value emission, blackout windows and checkpoint bursts

use crate::delta::{self, DeltaChoice};
use crate::format::{Encoding, DICT_START};
use crate::signal::{SignalId, SignalKind};

use super::Trace;

/// What became of an emitted value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    /// A change was recorded in the open granule
    Recorded,
    /// Same as the stored value; nothing to record
    Unchanged,
    /// Not accepted: blackout, empty value, unknown id or wrong kind
    Ignored,
}

impl Emitted {
    pub fn is_recorded(self) -> bool {
        self == Emitted::Recorded
    }

    /// Recorded or redundant
    pub fn is_accepted(self) -> bool {
        self != Emitted::Ignored
    }
}

impl Trace {
    /// Emit a bit-vector value given as `0`/`1`/`x`/`z`/... text, MSB first.
    ///
    /// A repeated value is [`Emitted::Unchanged`]; blackout, an empty value
    /// or a non-bit signal give [`Emitted::Ignored`].
    pub fn emit_bits<V: AsRef<[u8]>>(&mut self, id: SignalId, value: V) -> Emitted {
        let value = value.as_ref();
        if self.blackout || value.is_empty() || self.table.get(id).is_none() {
            return Emitted::Ignored;
        }
        self.ensure_frozen();
        let root = self.table.resolve(id);
        self.record_bits(root, value)
    }

    /// Emit an integer as `min(width, 32)` two's-complement bits
    pub fn emit_int(&mut self, id: SignalId, value: i32) -> Emitted {
        if self.blackout {
            return Emitted::Ignored;
        }
        let Some(signal) = self.table.get(id) else {
            return Emitted::Ignored;
        };
        let bits = delta::expand_integer(signal.width(), value);
        self.emit_bits(id, bits)
    }

    pub fn emit_double(&mut self, id: SignalId, value: f64) -> Emitted {
        if self.blackout || self.table.get(id).is_none() {
            return Emitted::Ignored;
        }
        self.ensure_frozen();
        let root = self.table.resolve(id);
        if self.table.signal_mut(root).kind != SignalKind::Double {
            return Emitted::Ignored;
        }
        let text = delta::format_double(value).into_bytes();
        self.record_text(root, text, false)
    }

    pub fn emit_string<V: AsRef<[u8]>>(&mut self, id: SignalId, value: V) -> Emitted {
        if self.blackout || self.table.get(id).is_none() {
            return Emitted::Ignored;
        }
        self.ensure_frozen();
        let root = self.table.resolve(id);
        if self.table.signal_mut(root).kind != SignalKind::String {
            return Emitted::Ignored;
        }
        self.record_text(root, value.as_ref().to_vec(), false)
    }

    fn record_bits(&mut self, root: SignalId, value: &[u8]) -> Emitted {
        let slot = self.clock.timepos;
        let relative = !self.clock.at_section_start();
        let signal = self.table.signal_mut(root);
        if signal.kind.is_textual() {
            return Emitted::Ignored;
        }
        let canonical = delta::justify(value, signal.len as usize);
        let Some(channel) = signal.channel_mut() else {
            return Emitted::Ignored;
        };
        if relative && channel.value == canonical {
            return Emitted::Unchanged;
        }

        let previous = relative.then_some(channel.value.as_slice());
        let code = match delta::choose(previous, &canonical) {
            DeltaChoice::Builtin(encoding) => encoding.code(),
            DeltaChoice::Literal(suffix) => self.strings.intern(suffix) + DICT_START,
        };
        channel.record(slot, code);
        channel.value = canonical;

        self.clock.bumptime = true;
        self.clock.granule_dirty = true;
        Emitted::Recorded
    }

    /// Record a double or string change; `force` skips the repeat check
    fn record_text(&mut self, root: SignalId, text: Vec<u8>, force: bool) -> Emitted {
        let slot = self.clock.timepos;
        let Some(channel) = self.table.signal_mut(root).channel_mut() else {
            return Emitted::Ignored;
        };
        if !force && channel.value == text {
            return Emitted::Unchanged;
        }
        let code = self.strings.intern(&text) + DICT_START;
        channel.record(slot, code);
        channel.value = text;

        self.clock.bumptime = true;
        self.clock.granule_dirty = true;
        Emitted::Recorded
    }

    /// Stop recording values.
    ///
    /// Every root gets a blackout code at the current time so readers see
    /// the gap.
    pub fn dump_off(&mut self) {
        if self.blackout {
            return;
        }
        self.ensure_frozen();

        let slot = self.clock.timepos;
        for idx in 0..self.table.roots().len() {
            let root = self.table.roots()[idx];
            if let Some(channel) = self.table.signal_mut(root).channel_mut() {
                channel.record(slot, Encoding::Blackout.code());
            }
        }

        self.clock.bumptime = true;
        self.clock.granule_dirty = true;
        self.blackout = true;
        tracing::debug!(time = self.clock.maxtime, "dumping off");
    }

    /// Resume recording.
    ///
    /// Stored values are replaced by sentinels that match nothing, then
    /// every single-row root is set to unknown (`x`, NaN or `UNDEF`).
    pub fn dump_on(&mut self) {
        if !self.blackout {
            return;
        }
        self.blackout = false;

        let roots = self.table.roots().to_vec();
        for &root in &roots {
            let signal = self.table.signal_mut(root);
            let kind = signal.kind;
            let len = signal.len as usize;
            if let Some(channel) = signal.channel_mut() {
                channel.value = match kind {
                    SignalKind::Double => b"0".to_vec(),
                    SignalKind::String => Vec::new(),
                    SignalKind::Bits | SignalKind::Integer => {
                        let mut sentinel = vec![b'x'; len.max(1)];
                        sentinel[0] = b'-';
                        sentinel
                    }
                };
            }
        }

        for &root in &roots {
            let Some(signal) = self.table.get(root) else {
                continue;
            };
            if signal.rows() >= 2 {
                continue;
            }
            match signal.kind() {
                SignalKind::Bits | SignalKind::Integer => {
                    self.record_bits(root, b"x");
                }
                SignalKind::Double => {
                    let text = delta::format_double(f64::NAN).into_bytes();
                    self.record_text(root, text, false);
                }
                SignalKind::String => {
                    self.record_text(root, b"UNDEF".to_vec(), false);
                }
            }
        }
        tracing::debug!(time = self.clock.maxtime, "dumping on");
    }

    /// Re-record the current value of every single-row root at the first
    /// slot of a section.
    pub(crate) fn checkpoint_burst(&mut self) {
        if self.blackout {
            self.blackout = false;
            self.dump_off();
            return;
        }

        let eligible: Vec<SignalId> = (0..self.table.len())
            .map(SignalId)
            .filter(|&id| {
                self.table
                    .get(id)
                    .map_or(false, |s| !s.is_alias() && s.rows() < 2)
            })
            .collect();
        if eligible.is_empty() {
            return;
        }
        self.ensure_frozen();

        for root in eligible {
            let Some(signal) = self.table.get(root) else {
                continue;
            };
            let kind = signal.kind();
            let current = signal.value().map(<[u8]>::to_vec).unwrap_or_default();
            match kind {
                SignalKind::Bits | SignalKind::Integer => {
                    self.record_bits(root, &current);
                }
                SignalKind::Double => {
                    let value = std::str::from_utf8(&current)
                        .ok()
                        .and_then(|text| text.parse::<f64>().ok())
                        .unwrap_or(0.0);
                    let text = delta::format_double(value).into_bytes();
                    self.record_text(root, text, true);
                }
                SignalKind::String => {
                    self.record_text(root, current, true);
                }
            }
        }
    }
}
