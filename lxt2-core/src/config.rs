//! Writer configuration
//!
//! [`TraceConfig`] holds every knob a trace reads when it is opened. It is
//! plain serde data, so the CLI can load it from JSON and overlay flags.

use serde::{Deserialize, Serialize};

use crate::error::{Lxt2Error, Result};
use crate::format::{DEFAULT_MAX_GRANULE, DEFAULT_PARTIAL_SIZE};

/// Environment variable that overrides the break size
pub const FILE_SIZE_LIMIT_ENV: &str = "LXT_FILE_SIZE_LIMIT";

/// Break size used by the simulator integration (1 GiB)
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 0x4000_0000;

/// Tuning presets offered by the simulator front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimumMode {
    /// Fast deflate with compressed vertical partials
    Speed,
    /// Maximum deflate, one member per section
    Space,
}

impl std::str::FromStr for OptimumMode {
    type Err = Lxt2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "speed" => Ok(OptimumMode::Speed),
            "space" => Ok(OptimumMode::Space),
            other => Err(Lxt2Error::InvalidConfig {
                reason: format!("unknown optimum mode '{}', expected speed or space", other),
            }),
        }
    }
}

/// Vertical partial layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMode {
    /// Give each facnum sub-range its own gzip member
    pub zip: bool,
    /// Roots per sub-range
    pub size: u32,
}

impl Default for PartialMode {
    fn default() -> Self {
        PartialMode {
            zip: false,
            size: DEFAULT_PARTIAL_SIZE,
        }
    }
}

/// Configuration for one trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Deflate level for section members, 0..=9
    pub compression_depth: u32,

    /// Granules per section; 0 means unbounded
    pub max_granule: u32,

    /// Start a new file once this many bytes are written; 0 never splits
    pub break_size: u64,

    /// Vertical partial layout, off when `None`
    pub partial: Option<PartialMode>,

    /// Re-emit every value at the start of each section
    pub checkpoint: bool,

    /// Fill character for new bit-vector signals
    pub initial_value: char,

    /// Remove trailing `[n]` from directory names
    pub strip_brackets: bool,

    /// Time unit as a power of ten seconds
    pub timescale: i8,

    /// Offset added by readers to every time value
    pub timezero: i64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            compression_depth: 4,
            max_granule: DEFAULT_MAX_GRANULE,
            break_size: 0,
            partial: None,
            checkpoint: true,
            initial_value: 'x',
            strip_brackets: false,
            timescale: -9,
            timezero: 0,
        }
    }
}

impl TraceConfig {
    /// Preset matching a simulator optimum mode
    pub fn for_mode(mode: OptimumMode) -> Self {
        Self::default().with_optimum_mode(mode)
    }

    pub fn with_optimum_mode(self, mode: OptimumMode) -> Self {
        match mode {
            OptimumMode::Speed => self.with_compression_depth(4).with_partial(true),
            OptimumMode::Space => self.with_compression_depth(9).without_partial(),
        }
    }

    /// Set deflate level; values above 9 clamp to 9
    pub fn with_compression_depth(mut self, depth: u32) -> Self {
        self.compression_depth = depth.min(9);
        self
    }

    pub fn with_max_granule(mut self, max_granule: u32) -> Self {
        self.max_granule = max_granule;
        self
    }

    pub fn with_break_size(mut self, bytes: u64) -> Self {
        self.break_size = bytes;
        self
    }

    /// Turn on vertical partials at the default sub-range size
    pub fn with_partial(mut self, zip: bool) -> Self {
        self.partial = Some(PartialMode {
            zip,
            ..PartialMode::default()
        });
        self
    }

    pub fn without_partial(mut self) -> Self {
        self.partial = None;
        self
    }

    pub fn with_checkpoint(mut self, enabled: bool) -> Self {
        self.checkpoint = enabled;
        self
    }

    /// Set the fill character; `Z` folds to `z`, anything unknown to `x`
    pub fn with_initial_value(mut self, value: char) -> Self {
        self.initial_value = normalize_initial_value(value);
        self
    }

    pub fn with_strip_brackets(mut self, strip: bool) -> Self {
        self.strip_brackets = strip;
        self
    }

    pub fn with_timescale(mut self, exponent: i8) -> Self {
        self.timescale = exponent;
        self
    }

    pub fn with_timezero(mut self, offset: i64) -> Self {
        self.timezero = offset;
        self
    }

    /// Apply `LXT_FILE_SIZE_LIMIT` from the process environment
    pub fn from_env(self) -> Self {
        let value = std::env::var(FILE_SIZE_LIMIT_ENV).ok();
        self.with_size_limit_override(value.as_deref())
    }

    /// Apply a size-limit override string; invalid or zero values are
    /// logged and ignored.
    pub fn with_size_limit_override(mut self, value: Option<&str>) -> Self {
        if let Some(raw) = value {
            match parse_size(raw) {
                Some(limit) if limit > 0 => self.break_size = limit,
                _ => tracing::warn!(
                    variable = FILE_SIZE_LIMIT_ENV,
                    value = raw,
                    "file size limit is invalid, keeping {}",
                    self.break_size
                ),
            }
        }
        self
    }

    /// Reject values a trace cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.compression_depth > 9 {
            return Err(Lxt2Error::InvalidConfig {
                reason: format!("compression depth {} is above 9", self.compression_depth),
            });
        }
        if let Some(partial) = self.partial {
            if partial.size == 0 {
                return Err(Lxt2Error::InvalidConfig {
                    reason: "partial size must be at least 1".to_string(),
                });
            }
        }
        if !matches!(self.initial_value, '0' | '1' | 'x' | 'z') {
            return Err(Lxt2Error::InvalidConfig {
                reason: format!("initial value '{}' is not one of 0, 1, x, z", self.initial_value),
            });
        }
        Ok(())
    }

    /// Granule limit with 0 read as unbounded
    pub(crate) fn granule_limit(&self) -> u32 {
        if self.max_granule == 0 {
            u32::MAX
        } else {
            self.max_granule
        }
    }

    pub(crate) fn initial_byte(&self) -> u8 {
        normalize_initial_value(self.initial_value) as u8
    }
}

/// Map a requested fill character onto `0`, `1`, `x` or `z`
pub fn normalize_initial_value(value: char) -> char {
    match value {
        '0' | '1' | 'x' | 'z' => value,
        'Z' => 'z',
        _ => 'x',
    }
}

/// Parse an unsigned size the way `strtoul(.., 0)` does: `0x` hex, leading
/// `0` octal, decimal otherwise. Trailing garbage is rejected.
pub fn parse_size(raw: &str) -> Option<u64> {
    let text = raw.trim_start();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

/// Configuration for the background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Commands buffered before the producer blocks
    pub capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

impl WorkerConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}
