//! Signal registry
//!
//! Owns every [`Signal`] by registration index, resolves names, and at
//! freeze time computes the directory order that fixes each root's facnum.

use std::collections::HashMap;

use crate::error::{Lxt2Error, Result};
use crate::format::{Encoding, SignalFlags};
use crate::signal::{range_width, strip_brackets, Channel, Signal, SignalId, SignalKind, Storage};

/// Registry of signals and aliases for one trace
#[derive(Debug, Default)]
pub struct SignalTable {
    signals: Vec<Signal>,
    by_name: HashMap<String, SignalId>,
    aliases: usize,
    name_bytes: u64,
    longest_name: u32,
    preferences: bool,
    order: Vec<SignalId>,
    roots: usize,
    frozen: bool,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root signal.
    ///
    /// `initial` is the fill character for bit-vector and integer values.
    pub fn add(
        &mut self,
        name: &str,
        rows: u32,
        msb: i32,
        lsb: i32,
        flags: SignalFlags,
        initial: u8,
    ) -> Result<SignalId> {
        self.check_open("add")?;
        let kind = SignalKind::from_flags(flags).ok_or_else(|| Lxt2Error::ConflictingKind {
            name: name.to_string(),
            flags: flags.bits(),
        })?;
        self.check_unique(name)?;

        let (msb, lsb, len) = match kind {
            SignalKind::Bits => (msb, lsb, range_width(msb, lsb)),
            SignalKind::Integer => (0, 0, 32),
            SignalKind::Double | SignalKind::String => (0, 0, 0),
        };

        let channel = match kind {
            SignalKind::Double => Channel::new(b"NaN".to_vec()),
            _ => {
                let mut channel = Channel::new(vec![initial; len as usize]);
                let code = Encoding::for_run(initial).unwrap_or(Encoding::AllX);
                channel.record(0, code.code());
                channel
            }
        };

        let id = self.push(Signal {
            name: name.to_string(),
            rows,
            msb,
            lsb,
            len,
            flags: flags.without(SignalFlags::ALIAS),
            kind,
            facnum: None,
            partial_preference: false,
            storage: Storage::Root(channel),
        });
        Ok(id)
    }

    /// Register `alias` as another name for `existing`, resolved to its root.
    pub fn alias(&mut self, existing: &str, alias: &str, msb: i32, lsb: i32) -> Result<SignalId> {
        self.check_open("alias")?;
        let target = self.find(existing).ok_or_else(|| Lxt2Error::UnknownSignal {
            name: existing.to_string(),
        })?;
        self.check_unique(alias)?;

        let root = self.resolve(target);
        let root_signal = &self.signals[root.0];
        let (msb, lsb, len) = if root_signal.kind == SignalKind::Bits {
            let width = range_width(msb, lsb);
            if width != root_signal.len {
                return Err(Lxt2Error::AliasWidthMismatch {
                    alias: alias.to_string(),
                    root: root_signal.name.clone(),
                    alias_width: width,
                    root_width: root_signal.len,
                });
            }
            (msb, lsb, width)
        } else {
            (0, 0, 0)
        };
        let kind = root_signal.kind;

        let id = self.push(Signal {
            name: alias.to_string(),
            rows: 0,
            msb,
            lsb,
            len,
            flags: SignalFlags::ALIAS,
            kind,
            facnum: None,
            partial_preference: false,
            storage: Storage::Alias { root },
        });
        self.aliases += 1;
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<SignalId> {
        self.by_name.get(name).copied()
    }

    /// Follow alias links down to the root signal
    pub fn resolve(&self, id: SignalId) -> SignalId {
        match self.signals[id.0].storage {
            Storage::Alias { root } => root,
            Storage::Root(_) => id,
        }
    }

    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(id.0)
    }

    pub(crate) fn signal_mut(&mut self, id: SignalId) -> &mut Signal {
        &mut self.signals[id.0]
    }

    /// Ask for `name`'s root to be placed ahead of other signals at freeze.
    ///
    /// Returns false when the table is frozen or the name is unknown.
    pub fn set_partial_preference(&mut self, name: &str) -> bool {
        if self.frozen {
            return false;
        }
        match self.find(name) {
            Some(id) => {
                let root = self.resolve(id);
                self.signals[root.0].partial_preference = true;
                self.preferences = true;
                true
            }
            None => false,
        }
    }

    /// Signals and aliases registered
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases
    }

    /// Sum over all names of name length plus terminator
    pub fn name_bytes(&self) -> u64 {
        self.name_bytes
    }

    pub fn longest_name(&self) -> u32 {
        self.longest_name
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Directory order computed at freeze; roots first
    pub fn order(&self) -> &[SignalId] {
        &self.order
    }

    /// Roots in facnum order (empty before freeze)
    pub fn roots(&self) -> &[SignalId] {
        &self.order[..self.roots]
    }

    /// Name as it appears in the directory
    pub fn directory_name(&self, id: SignalId, strip: bool) -> &str {
        let name = self.signals[id.0].name.as_str();
        if strip {
            strip_brackets(name)
        } else {
            name
        }
    }

    /// Close registration and assign facnums.
    ///
    /// Order: registration order, stable-sorted by directory name, then
    /// preferred roots moved to the front, then roots ahead of aliases.
    pub fn freeze(&mut self, strip: bool) -> &[SignalId] {
        if self.frozen {
            return &self.order;
        }
        self.frozen = true;

        let mut order: Vec<SignalId> = (0..self.signals.len()).map(SignalId).collect();
        order.sort_by(|a, b| {
            self.directory_name(*a, strip)
                .as_bytes()
                .cmp(self.directory_name(*b, strip).as_bytes())
        });

        if self.preferences {
            let (preferred, rest): (Vec<_>, Vec<_>) = order
                .into_iter()
                .partition(|id| self.signals[id.0].partial_preference);
            order = preferred.into_iter().chain(rest).collect();
        }

        let (roots, aliases): (Vec<_>, Vec<_>) = order
            .into_iter()
            .partition(|id| !self.signals[id.0].is_alias());
        self.roots = roots.len();
        self.order = roots.into_iter().chain(aliases).collect();

        for (facnum, id) in self.order.iter().enumerate() {
            self.signals[id.0].facnum = Some(facnum as u32);
        }
        &self.order
    }

    fn check_open(&self, operation: &str) -> Result<()> {
        if self.frozen {
            Err(Lxt2Error::Frozen {
                operation: operation.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.by_name.contains_key(name) {
            Err(Lxt2Error::DuplicateName {
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn push(&mut self, signal: Signal) -> SignalId {
        let id = SignalId(self.signals.len());
        let name_len = signal.name.len() as u32;
        self.longest_name = self.longest_name.max(name_len);
        self.name_bytes += u64::from(name_len) + 1;
        self.by_name.insert(signal.name.clone(), id);
        self.signals.push(signal);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(table: &mut SignalTable, name: &str, width: i32) -> SignalId {
        table
            .add(name, 0, width - 1, 0, SignalFlags::BITS, b'x')
            .unwrap()
    }

    #[test]
    fn test_add_records_initial_change() {
        let mut table = SignalTable::new();
        let id = bits(&mut table, "top.a", 4);
        let signal = table.get(id).unwrap();
        assert_eq!(signal.value(), Some(&b"xxxx"[..]));
        assert_eq!(
            signal.channel().unwrap().codes,
            vec![Encoding::AllX.code()]
        );
        assert_eq!(table.name_bytes(), 6);
        assert_eq!(table.longest_name(), 5);
    }

    #[test]
    fn test_double_starts_as_nan_without_change() {
        let mut table = SignalTable::new();
        let id = table
            .add("top.r", 0, 0, 0, SignalFlags::DOUBLE, b'0')
            .unwrap();
        let signal = table.get(id).unwrap();
        assert_eq!(signal.value(), Some(&b"NaN"[..]));
        assert!(signal.channel().unwrap().codes.is_empty());
        assert_eq!(signal.width(), 0);
    }

    #[test]
    fn test_integer_is_32_wide() {
        let mut table = SignalTable::new();
        let id = table
            .add("top.i", 0, 7, 0, SignalFlags::INTEGER, b'0')
            .unwrap();
        let signal = table.get(id).unwrap();
        assert_eq!(signal.width(), 32);
        assert_eq!(signal.msb(), 0);
        assert_eq!(
            signal.channel().unwrap().codes,
            vec![Encoding::Zeros.code()]
        );
    }

    #[test]
    fn test_duplicate_and_conflicting() {
        let mut table = SignalTable::new();
        bits(&mut table, "a", 1);
        assert!(matches!(
            table.add("a", 0, 0, 0, SignalFlags::BITS, b'x'),
            Err(Lxt2Error::DuplicateName { .. })
        ));
        assert!(matches!(
            table.add("b", 0, 0, 0, SignalFlags::INTEGER | SignalFlags::STRING, b'x'),
            Err(Lxt2Error::ConflictingKind { .. })
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_alias_resolves_transitively() {
        let mut table = SignalTable::new();
        let w = bits(&mut table, "w", 8);
        table.alias("w", "w2", 7, 0).unwrap();
        let w4 = table.alias("w2", "w4", 0, 7).unwrap();
        assert_eq!(table.get(w4).unwrap().alias_of(), Some(w));
        assert_eq!(table.resolve(w4), w);
        assert_eq!(table.alias_count(), 2);

        assert!(matches!(
            table.alias("w", "w3", 3, 0),
            Err(Lxt2Error::AliasWidthMismatch { .. })
        ));
        assert!(matches!(
            table.alias("nope", "w5", 7, 0),
            Err(Lxt2Error::UnknownSignal { .. })
        ));
    }

    #[test]
    fn test_freeze_order() {
        let mut table = SignalTable::new();
        bits(&mut table, "c", 1);
        bits(&mut table, "b", 1);
        table.alias("c", "a", 0, 0).unwrap();
        bits(&mut table, "d", 1);
        table.set_partial_preference("d");

        let frozen = table.freeze(false).to_vec();
        let names: Vec<String> = frozen
            .iter()
            .map(|id| table.get(*id).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["d", "b", "c", "a"]);
        assert_eq!(table.roots().len(), 3);
        assert_eq!(table.get(SignalId(2)).unwrap().facnum(), Some(3));

        assert!(matches!(
            table.add("e", 0, 0, 0, SignalFlags::BITS, b'x'),
            Err(Lxt2Error::Frozen { .. })
        ));
        assert!(!table.set_partial_preference("b"));
    }

    #[test]
    fn test_freeze_sorts_stripped_names() {
        let mut table = SignalTable::new();
        bits(&mut table, "bus[1]", 1);
        bits(&mut table, "bus[0]", 1);
        bits(&mut table, "bus", 1);
        let order: Vec<usize> = table.freeze(true).iter().map(|id| id.index()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
