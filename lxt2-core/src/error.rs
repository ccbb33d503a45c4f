//! Error types for LXT2 trace writing
//!
//! This module provides the error handling used across the writer:
//! - Structured error types with descriptive messages
//! - Stable error codes for programmatic handling
//! - Error categories for grouping and filtering
//! - JSON serialization for tool output
//!
//! # Failure taxonomy
//!
//! - **Misuse** (registration after the directory is frozen, unknown
//!   signals, receding time) is reported as an `Err` and never aborts.
//! - **I/O faults** while opening surface immediately; faults in the middle
//!   of the stream are logged, counted and handed back from `close()`.
//! - **Internal invariant breaks** that would silently corrupt the trace go
//!   through [`fatal`], which terminates the process.
//!
//! # Example
//!
//! ```rust
//! use lxt2_core::error::{Lxt2Error, ErrorCategory};
//!
//! let err = Lxt2Error::Frozen { operation: "add".to_string() };
//! assert_eq!(err.category(), ErrorCategory::Misuse);
//! assert_eq!(err.error_code(), "DIRECTORY_FROZEN");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for LXT2 operations
pub type Result<T> = std::result::Result<T, Lxt2Error>;

/// Process exit status used for unrecoverable internal errors
pub const FATAL_EXIT_STATUS: i32 = 255;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// API used in the wrong state or with bad arguments
    Misuse,
    /// A named signal does not exist
    NotFound,
    /// A name is already taken
    Conflict,
    /// Underlying storage failed
    Io,
    /// Internal invariant broken
    Internal,
}

/// Errors that can occur while writing a trace
#[derive(Error, Debug)]
pub enum Lxt2Error {
    // ═══════════════════════════════════════════════════════════════════════
    // Signal table errors
    // ═══════════════════════════════════════════════════════════════════════

    /// The directory was already emitted; registration is closed
    #[error("Cannot {operation} after the first value change: the signal directory is frozen.")]
    Frozen { operation: String },

    /// A signal or alias with this name already exists
    #[error("Signal '{name}' is already registered.")]
    DuplicateName { name: String },

    /// Lookup of a name that was never registered
    #[error("Signal '{name}' not found. Register it with add() first.")]
    UnknownSignal { name: String },

    /// More than one of integer/double/string was requested
    #[error("Signal '{name}' requests more than one value kind (flags {flags:#x}).")]
    ConflictingKind { name: String, flags: u32 },

    /// Alias bit range disagrees with the root signal width
    #[error("Alias '{alias}' spans {alias_width} bits but '{root}' is {root_width} bits wide.")]
    AliasWidthMismatch {
        alias: String,
        root: String,
        alias_width: u32,
        root_width: u32,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Time and configuration errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Time may only move forward
    #[error("Time cannot recede: requested {requested}, current time is {current}.")]
    TimeWentBackwards { requested: u64, current: u64 },

    /// Configuration value out of range or unparsable
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The worker thread is gone; commands can no longer be posted
    #[error("Trace worker has stopped: {reason}")]
    WorkerStopped { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    Internal { reason: String },
}

impl Lxt2Error {
    /// Returns true if retrying the same call later might succeed
    ///
    /// Only I/O failures qualify; misuse errors need different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Lxt2Error::Io(_))
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Lxt2Error::Frozen { .. }
            | Lxt2Error::ConflictingKind { .. }
            | Lxt2Error::AliasWidthMismatch { .. }
            | Lxt2Error::TimeWentBackwards { .. }
            | Lxt2Error::InvalidConfig { .. }
            | Lxt2Error::WorkerStopped { .. } => ErrorCategory::Misuse,

            Lxt2Error::UnknownSignal { .. } => ErrorCategory::NotFound,

            Lxt2Error::DuplicateName { .. } => ErrorCategory::Conflict,

            Lxt2Error::Io(_) | Lxt2Error::Json(_) => ErrorCategory::Io,

            Lxt2Error::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Lxt2Error::Frozen { .. } => "DIRECTORY_FROZEN",
            Lxt2Error::DuplicateName { .. } => "DUPLICATE_NAME",
            Lxt2Error::UnknownSignal { .. } => "UNKNOWN_SIGNAL",
            Lxt2Error::ConflictingKind { .. } => "CONFLICTING_KIND",
            Lxt2Error::AliasWidthMismatch { .. } => "ALIAS_WIDTH_MISMATCH",
            Lxt2Error::TimeWentBackwards { .. } => "TIME_WENT_BACKWARDS",
            Lxt2Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Lxt2Error::WorkerStopped { .. } => "WORKER_STOPPED",
            Lxt2Error::Io(_) => "IO_ERROR",
            Lxt2Error::Json(_) => "JSON_ERROR",
            Lxt2Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable response object
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

/// JSON-serializable error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "DIRECTORY_FROZEN")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}

/// Abort on a broken internal invariant.
///
/// Continuing would write a trace no reader can decode, so the process
/// exits with [`FATAL_EXIT_STATUS`] after logging the diagnostic.
pub fn fatal(reason: &str) -> ! {
    tracing::error!(reason, "lxt2 internal error, exiting");
    eprintln!("lxt2 internal error: {}", reason);
    std::process::exit(FATAL_EXIT_STATUS)
}
