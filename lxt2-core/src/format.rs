//! LXT2 container constants
//!
//! Everything a reader relies on to find its way through the file lives
//! here: the magic and version at offset 0, granule geometry, block tags,
//! the change-code alphabet and the signal flag bits stored in the
//! geometry table.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Magic number at offset 0
pub const HEADER_ID: u16 = 0x1380;

/// Container version
pub const VERSION: u16 = 0x0001;

/// Time steps per granule; also the width of the change bitmask
pub const GRANULE_SIZE: usize = 64;

/// Default granules per section
pub const DEFAULT_MAX_GRANULE: u32 = 256;

/// Default signal count per vertical partial block
pub const DEFAULT_PARTIAL_SIZE: u32 = 2048;

/// Compression level used for the name and geometry members
pub const DIRECTORY_COMPRESSION: u32 = 9;

/// Bytes of raw section header (two sizes, two times)
pub const SECTION_HEADER_LEN: u64 = 24;

/// Bytes of raw header in front of a partial-zip sub-range
pub const SUBRANGE_HEADER_LEN: u64 = 12;

/// Sub-range "first facnum" value that marks the dictionary control block
pub const CONTROL_BLOCK_MARKER: u32 = 0xFFFF_FFFF;

/// Longest shared prefix the name compressor will record
pub const MAX_SHARED_PREFIX: usize = 65535;

/// Block tags inside a section member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockTag {
    /// Full-width granule
    Time = 0,
    /// Section dictionary trailer
    Dict = 1,
    /// Granule covering a contiguous facnum range
    TimePartial = 2,
}

/// Change codes recorded per signal per time slot
///
/// Codes below [`DICT_START`] are built in; a dictionary value with index
/// `i` is recorded as `i + DICT_START`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Encoding {
    /// Every bit '0'
    Zeros = 0,
    /// Every bit '1'
    Ones = 1,
    /// Every bit of the previous value complemented
    Invert = 2,
    /// Shift left, fill '0'
    ShiftLeft0 = 3,
    /// Shift left, fill '1'
    ShiftLeft1 = 4,
    /// Shift right, fill '0'
    ShiftRight0 = 5,
    /// Shift right, fill '1'
    ShiftRight1 = 6,
    Add1 = 7,
    Add2 = 8,
    Add3 = 9,
    Add4 = 10,
    Sub1 = 11,
    Sub2 = 12,
    Sub3 = 13,
    Sub4 = 14,
    /// Every bit 'x'
    AllX = 15,
    /// Every bit 'z'
    AllZ = 16,
    /// Dumping was switched off here
    Blackout = 17,
}

/// First change code that refers to the string dictionary
pub const DICT_START: u32 = 18;

impl Encoding {
    /// The code written to disk
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Run code for a vector made of a single repeated character
    pub fn for_run(ch: u8) -> Option<Encoding> {
        match ch {
            b'0' => Some(Encoding::Zeros),
            b'1' => Some(Encoding::Ones),
            b'x' | b'X' => Some(Encoding::AllX),
            b'z' | b'Z' => Some(Encoding::AllZ),
            _ => None,
        }
    }

    /// Add code for an offset of 1..=4
    pub fn add(offset: u32) -> Option<Encoding> {
        match offset {
            1 => Some(Encoding::Add1),
            2 => Some(Encoding::Add2),
            3 => Some(Encoding::Add3),
            4 => Some(Encoding::Add4),
            _ => None,
        }
    }

    /// Subtract code for an offset of 1..=4
    pub fn sub(offset: u32) -> Option<Encoding> {
        match offset {
            1 => Some(Encoding::Sub1),
            2 => Some(Encoding::Sub2),
            3 => Some(Encoding::Sub3),
            4 => Some(Encoding::Sub4),
            _ => None,
        }
    }

    /// Decode a built-in code
    pub fn from_code(code: u32) -> Option<Encoding> {
        use Encoding::*;
        const ALL: [Encoding; 18] = [
            Zeros, Ones, Invert, ShiftLeft0, ShiftLeft1, ShiftRight0, ShiftRight1, Add1, Add2,
            Add3, Add4, Sub1, Sub2, Sub3, Sub4, AllX, AllZ, Blackout,
        ];
        ALL.get(code as usize).copied()
    }
}

/// Signal attribute bits as stored in the geometry table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalFlags(u32);

impl SignalFlags {
    pub const BITS: SignalFlags = SignalFlags(0);
    pub const INTEGER: SignalFlags = SignalFlags(1 << 0);
    pub const DOUBLE: SignalFlags = SignalFlags(1 << 1);
    pub const STRING: SignalFlags = SignalFlags(1 << 2);
    /// Time values are carried as preformatted strings
    pub const TIME: SignalFlags = SignalFlags::STRING;
    pub const ALIAS: SignalFlags = SignalFlags(1 << 3);

    pub const SIGNED: SignalFlags = SignalFlags(1 << 4);
    pub const BOOLEAN: SignalFlags = SignalFlags(1 << 5);
    pub const NATURAL: SignalFlags = SignalFlags((1 << 6) | 1);
    pub const POSITIVE: SignalFlags = SignalFlags((1 << 7) | 1);
    pub const CHARACTER: SignalFlags = SignalFlags(1 << 8);

    pub const CONSTANT: SignalFlags = SignalFlags(1 << 9);
    pub const VARIABLE: SignalFlags = SignalFlags(1 << 10);
    pub const SIGNAL: SignalFlags = SignalFlags(1 << 11);

    pub const IN: SignalFlags = SignalFlags(1 << 12);
    pub const OUT: SignalFlags = SignalFlags(1 << 13);
    pub const INOUT: SignalFlags = SignalFlags(1 << 14);

    pub const WIRE: SignalFlags = SignalFlags(1 << 15);
    pub const REG: SignalFlags = SignalFlags(1 << 16);

    /// Wrap raw bits
    pub const fn from_bits(bits: u32) -> Self {
        SignalFlags(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set
    pub const fn contains(self, other: SignalFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set
    pub const fn intersects(self, other: SignalFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Copy with the bits of `other` cleared
    pub const fn without(self, other: SignalFlags) -> Self {
        SignalFlags(self.0 & !other.0)
    }
}

impl BitOr for SignalFlags {
    type Output = SignalFlags;

    fn bitor(self, rhs: Self) -> Self {
        SignalFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SignalFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SignalFlags {
    type Output = SignalFlags;

    fn bitand(self, rhs: Self) -> Self {
        SignalFlags(self.0 & rhs.0)
    }
}

impl fmt::LowerHex for SignalFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Smallest byte width (1..=4) able to index `count` entries
pub fn index_width(count: u64) -> u8 {
    if count <= 1 << 8 {
        1
    } else if count <= 1 << 16 {
        2
    } else if count <= 1 << 24 {
        3
    } else {
        4
    }
}
