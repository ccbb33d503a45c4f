//! Signals and aliases
//!
//! A [`Signal`] is either a root carrying its own value and per-granule
//! change buffer, or an alias that only points at a root and keeps its own
//! bit-range view for the directory.

use serde::{Deserialize, Serialize};

use crate::format::SignalFlags;

/// Handle to a registered signal or alias
///
/// Handles are plain indices into the owning trace's table and stay valid
/// until the trace is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub(crate) usize);

impl SignalId {
    /// Registration index
    pub fn index(self) -> usize {
        self.0
    }
}

/// Value representation of a root signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Four-state bit-vector of `|msb - lsb| + 1` characters
    Bits,
    /// 32-bit integer carried as a bit-vector
    Integer,
    /// Real value, recorded through the string dictionary
    Double,
    /// Free-form string, recorded through the string dictionary
    String,
}

impl SignalKind {
    /// Kind selected by the flag bits, or `None` when more than one of
    /// integer, double and string is requested.
    pub fn from_flags(flags: SignalFlags) -> Option<SignalKind> {
        let requested = [
            (SignalFlags::INTEGER, SignalKind::Integer),
            (SignalFlags::DOUBLE, SignalKind::Double),
            (SignalFlags::STRING, SignalKind::String),
        ];
        let mut kinds = requested
            .iter()
            .filter(|(bit, _)| flags.intersects(*bit))
            .map(|(_, kind)| *kind);

        match (kinds.next(), kinds.next()) {
            (None, _) => Some(SignalKind::Bits),
            (Some(kind), None) => Some(kind),
            (Some(_), Some(_)) => None,
        }
    }

    /// True for kinds whose changes are always dictionary strings
    pub fn is_textual(self) -> bool {
        matches!(self, SignalKind::Double | SignalKind::String)
    }
}

/// Current value and pending changes of a root signal
#[derive(Debug, Clone, Default)]
pub(crate) struct Channel {
    /// Last value in canonical form
    pub value: Vec<u8>,
    /// Bit `n` set when slot `n` of the open granule holds a change
    pub msk: u64,
    /// One change code per set bit of `msk`, oldest first
    pub codes: Vec<u32>,
}

impl Channel {
    pub fn new(value: Vec<u8>) -> Self {
        Channel {
            value,
            msk: 0,
            codes: Vec::new(),
        }
    }

    /// Record `code` at `slot`; a second change in the same slot replaces
    /// the first.
    pub fn record(&mut self, slot: usize, code: u32) {
        let bit = 1u64 << slot;
        match self.codes.last_mut() {
            Some(last) if self.msk & bit != 0 => *last = code,
            _ => {
                self.msk |= bit;
                self.codes.push(code);
            }
        }
    }

    /// Forget the granule that was just written
    pub fn reset_granule(&mut self) {
        self.msk = 0;
        self.codes.clear();
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Storage {
    Root(Channel),
    Alias { root: SignalId },
}

/// A registered signal or alias
#[derive(Debug, Clone)]
pub struct Signal {
    pub(crate) name: String,
    pub(crate) rows: u32,
    pub(crate) msb: i32,
    pub(crate) lsb: i32,
    pub(crate) len: u32,
    pub(crate) flags: SignalFlags,
    pub(crate) kind: SignalKind,
    pub(crate) facnum: Option<u32>,
    pub(crate) partial_preference: bool,
    pub(crate) storage: Storage,
}

impl Signal {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Array rows; only single-row signals take part in checkpoint bursts
    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn msb(&self) -> i32 {
        self.msb
    }

    pub fn lsb(&self) -> i32 {
        self.lsb
    }

    /// Characters in the canonical value (0 for doubles and strings)
    pub fn width(&self) -> u32 {
        self.len
    }

    pub fn flags(&self) -> SignalFlags {
        self.flags
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.storage, Storage::Alias { .. })
    }

    /// Root this alias resolves to; `None` for a root signal
    pub fn alias_of(&self) -> Option<SignalId> {
        match self.storage {
            Storage::Alias { root } => Some(root),
            Storage::Root(_) => None,
        }
    }

    /// Position in the directory, assigned when the trace freezes
    pub fn facnum(&self) -> Option<u32> {
        self.facnum
    }

    /// Current canonical value of a root signal
    pub fn value(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Root(channel) => Some(&channel.value),
            Storage::Alias { .. } => None,
        }
    }

    pub(crate) fn channel(&self) -> Option<&Channel> {
        match &self.storage {
            Storage::Root(channel) => Some(channel),
            Storage::Alias { .. } => None,
        }
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut Channel> {
        match &mut self.storage {
            Storage::Root(channel) => Some(channel),
            Storage::Alias { .. } => None,
        }
    }
}

/// Bits spanned by an `msb..lsb` range in either direction
pub fn range_width(msb: i32, lsb: i32) -> u32 {
    let span = (i64::from(msb) - i64::from(lsb)).unsigned_abs() + 1;
    u32::try_from(span).unwrap_or(u32::MAX)
}

/// Drop a trailing `[index]` suffix from a name.
///
/// Names shorter than three bytes and names whose bracket body contains a
/// `.` come back unchanged.
pub fn strip_brackets(name: &str) -> &str {
    let bytes = name.as_bytes();
    if bytes.len() < 3 || bytes.last() != Some(&b']') {
        return name;
    }
    for i in (1..bytes.len() - 1).rev() {
        match bytes[i] {
            b'.' => return name,
            b'[' => return &name[..i],
            _ => {}
        }
    }
    name
}
