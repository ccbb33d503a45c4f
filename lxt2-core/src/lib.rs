//! # LXT2 Core - Streaming Waveform Trace Writer
//!
//! Records the values of many named signals from an event-driven
//! simulation into a compact, seekable, compressed LXT2 file:
//!
//! - **Signal table**: named bit-vector, integer, double and string
//!   signals plus aliases, frozen into a sorted directory on first use
//! - **Delta coding**: bit-vector changes become cheap built-in codes
//!   (runs, complement, shifts, ±1..4) or dictionary entries
//! - **Granules and sections**: 64 time slots per block, blocks grouped
//!   into sections that finish with their own dictionaries, so readers can
//!   start at any section
//! - **Partial access, checkpoints and break files** for very large traces
//!
//! ## Example
//!
//! ```rust
//! use lxt2_core::{SignalFlags, Trace, TraceConfig};
//! use lxt2_core::storage::MemoryStorage;
//!
//! let storage = MemoryStorage::new();
//! let mut trace = Trace::with_storage(storage.clone(), TraceConfig::default()).unwrap();
//!
//! let clk = trace.add("top.clk", 0, 0, 0, SignalFlags::BITS).unwrap();
//! let bus = trace.add("top.bus", 0, 7, 0, SignalFlags::BITS).unwrap();
//!
//! for t in 0..10u64 {
//!     trace.set_time64(t * 5).unwrap();
//!     trace.emit_bits(clk, if t % 2 == 0 { "0" } else { "1" });
//!     trace.emit_int(bus, t as i32);
//! }
//!
//! let stats = trace.close().unwrap();
//! assert_eq!(stats.sections_closed, 1);
//! assert_eq!(&storage.primary()[..2], &[0x13, 0x80]);
//! ```

pub mod config;
pub mod delta;
pub mod dictionary;
pub mod directory;
pub mod error;
pub mod format;
pub(crate) mod output;
pub mod signal;
pub mod storage;
pub mod table;
pub mod trace;
pub mod worker;

#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export main types
pub use config::{OptimumMode, PartialMode, TraceConfig, WorkerConfig};
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, Lxt2Error, Result};
pub use format::{Encoding, SignalFlags};
pub use signal::{Signal, SignalId, SignalKind};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use table::SignalTable;
pub use trace::{Emitted, Trace, TraceStats};
pub use worker::TraceWorker;

/// Crate version, as reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_session_in_memory() {
        let storage = MemoryStorage::new();
        let mut trace = Trace::with_storage(storage.clone(), TraceConfig::default()).unwrap();

        let a = trace.add("top.a", 0, 3, 0, SignalFlags::BITS).unwrap();
        let r = trace.add("top.r", 0, 0, 0, SignalFlags::DOUBLE).unwrap();
        let s = trace.add("top.state", 0, 0, 0, SignalFlags::STRING).unwrap();
        trace.alias("top.a", "top.a_copy", 3, 0).unwrap();

        trace.set_time(0).unwrap();
        trace.emit_bits(a, "0000");
        trace.set_time(10).unwrap();
        assert!(trace.emit_bits(a, "0001").is_recorded());
        assert!(trace.emit_double(r, 3.25).is_recorded());
        assert!(trace.emit_string(s, "run").is_recorded());

        let stats = trace.close().unwrap();
        assert_eq!(stats.signals, 3);
        assert_eq!(stats.aliases, 1);
        assert_eq!(stats.sections_closed, 1);
        assert_eq!(stats.granules_flushed, 1);
        assert_eq!(stats.last_time, 10);
        assert_eq!(stats.io_errors, 0);
        assert!(storage.primary().len() > 5);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = TraceStats {
            signals: 2,
            file_parts: 1,
            ..TraceStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["signals"], 2);
        assert_eq!(json["file_parts"], 1);
    }
}
