//! Section-local dictionaries
//!
//! Both dictionaries hand out dense indices in insertion order and are
//! written out and emptied when a section closes.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use crate::error::fatal;

/// Insertion-ordered interning table
#[derive(Debug, Clone)]
pub struct Dictionary<K> {
    index: HashMap<K, u32>,
    entries: Vec<K>,
}

impl<K> Default for Dictionary<K> {
    fn default() -> Self {
        Dictionary {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> Dictionary<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `key`, inserting it at the end on a miss.
    ///
    /// The flag is true when the key was new.
    pub fn intern<Q>(&mut self, key: &Q) -> (u32, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(&idx) = self.index.get(key) {
            return (idx, false);
        }
        let idx = self.entries.len() as u32;
        let owned = key.to_owned();
        self.index.insert(owned.clone(), idx);
        self.entries.push(owned);
        (idx, true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order
    pub fn entries(&self) -> &[K] {
        &self.entries
    }

    /// Take every entry in index order and start over at index 0
    pub fn drain(&mut self) -> Vec<K> {
        if self.index.len() != self.entries.len() {
            fatal("dictionary index and entry list disagree");
        }
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

/// Granule change masks
pub type MapDictionary = Dictionary<u64>;

/// Dictionary of value strings that also tracks their NUL-terminated size
#[derive(Debug, Clone, Default)]
pub struct StringDictionary {
    inner: Dictionary<Vec<u8>>,
    bytes: u64,
}

impl StringDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &[u8]) -> u32 {
        let (idx, inserted) = self.inner.intern(value);
        if inserted {
            self.bytes += value.len() as u64 + 1;
        }
        idx
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bytes the trailer needs for every entry plus its terminator
    pub fn byte_size(&self) -> u64 {
        self.bytes
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        self.inner.entries()
    }

    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.bytes = 0;
        self.inner.drain()
    }
}
