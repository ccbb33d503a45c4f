//! FFI (Foreign Function Interface) for LXT2 Core
//!
//! A C-compatible writer API with the `lxt2_wr_*` names simulators link
//! against.
//!
//! ## Thread Safety
//!
//! A trace handle is NOT thread-safe. Drive each handle from one thread, or
//! synchronize in the caller.
//!
//! ## Memory Management
//!
//! - `lxt2_wr_init` returns a handle that is released by `lxt2_wr_close`.
//! - Symbol handles belong to their trace and stay valid until it is
//!   closed. They are never freed individually.
//! - Strings returned by `lxt2_wr_get_last_error` must be freed with
//!   `lxt2_wr_free_string`.
//!
//! ## Error Handling
//!
//! - Every function accepts a null trace and does nothing, returning null
//!   or 0.
//! - Use `lxt2_wr_get_last_error` to retrieve the reason for a failure.
//! - Error messages are thread-local.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr;

use libc::{c_char, c_double, c_int, c_uint};

use crate::format::SignalFlags;
use crate::signal::SignalId;
use crate::trace::{Emitted, Trace};

// Thread-local storage for error messages
thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

fn set_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg);
    });
}

fn clear_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// String Helpers
// ============================================================================

/// Get the last error message.
///
/// Returns null if no error occurred.
/// The returned string must be freed with `lxt2_wr_free_string`.
#[no_mangle]
pub extern "C" fn lxt2_wr_get_last_error() -> *mut c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => CString::new(msg.as_str())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    })
}

/// Free a string returned by this API.
#[no_mangle]
pub extern "C" fn lxt2_wr_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

unsafe fn c_bytes<'a>(s: *const c_char) -> Option<&'a [u8]> {
    if s.is_null() {
        return None;
    }
    Some(CStr::from_ptr(s).to_bytes())
}

// ============================================================================
// Trace Handles
// ============================================================================

/// Opaque handle to a trace
pub struct Lxt2WrTrace {
    inner: Trace,
    /// One boxed handle per signal id, so pointers stay put
    symbols: Vec<Box<Lxt2WrSymbol>>,
}

/// Opaque handle to a signal or alias
pub struct Lxt2WrSymbol {
    id: SignalId,
}

impl Lxt2WrTrace {
    fn symbol(&mut self, id: SignalId) -> *mut Lxt2WrSymbol {
        while self.symbols.len() <= id.index() {
            let next = SignalId(self.symbols.len());
            self.symbols.push(Box::new(Lxt2WrSymbol { id: next }));
        }
        &mut *self.symbols[id.index()] as *mut Lxt2WrSymbol
    }
}

unsafe fn trace_mut<'a>(lt: *mut Lxt2WrTrace) -> Option<&'a mut Lxt2WrTrace> {
    lt.as_mut()
}

unsafe fn symbol_id(s: *const Lxt2WrSymbol) -> Option<SignalId> {
    s.as_ref().map(|symbol| symbol.id)
}

/// Open `name` for writing.
///
/// Returns null if the file cannot be created.
#[no_mangle]
pub extern "C" fn lxt2_wr_init(name: *const c_char) -> *mut Lxt2WrTrace {
    clear_error();
    let Some(path) = (unsafe { c_str(name) }) else {
        set_error("Null or invalid file name".to_string());
        return ptr::null_mut();
    };
    match Trace::create(path) {
        Ok(inner) => Box::into_raw(Box::new(Lxt2WrTrace {
            inner,
            symbols: Vec::new(),
        })),
        Err(e) => {
            set_error(format!("Failed to open trace: {}", e));
            ptr::null_mut()
        }
    }
}

/// Finalize and close the trace; the handle and its symbols are freed.
#[no_mangle]
pub extern "C" fn lxt2_wr_close(lt: *mut Lxt2WrTrace) {
    clear_error();
    if lt.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(lt) };
    if let Err(e) = handle.inner.close() {
        set_error(format!("Trace closed with write errors: {}", e));
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_flush(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.flush();
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[no_mangle]
pub extern "C" fn lxt2_wr_set_compression_depth(lt: *mut Lxt2WrTrace, depth: c_uint) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_compression_depth(depth);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_maxgranule(lt: *mut Lxt2WrTrace, maxgranule: c_uint) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_max_granule(maxgranule);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_break_size(lt: *mut Lxt2WrTrace, size: i64) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_break_size(size.max(0) as u64);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_partial_off(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_partial_off();
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_partial_on(lt: *mut Lxt2WrTrace, zipmode: c_int) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_partial_on(zipmode != 0);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_partial_preference(lt: *mut Lxt2WrTrace, name: *const c_char) {
    if let (Some(lt), Some(name)) = unsafe { (trace_mut(lt), c_str(name)) } {
        lt.inner.set_partial_preference(name);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_checkpoint_off(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_checkpoint(false);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_checkpoint_on(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_checkpoint(true);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_initial_value(lt: *mut Lxt2WrTrace, value: c_char) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_initial_value(value as u8 as char);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_symbol_bracket_stripping(lt: *mut Lxt2WrTrace, doit: c_int) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_bracket_stripping(doit != 0);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_timescale(lt: *mut Lxt2WrTrace, timescale: c_int) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_timescale(timescale.clamp(i8::MIN.into(), i8::MAX.into()) as i8);
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_timezero(lt: *mut Lxt2WrTrace, timeval: i64) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.set_timezero(timeval);
    }
}

// ============================================================================
// Symbols
// ============================================================================

/// Register a signal.
///
/// Returns null once the directory is written, for a duplicate name, or
/// for conflicting kind flags.
#[no_mangle]
pub extern "C" fn lxt2_wr_symbol_add(
    lt: *mut Lxt2WrTrace,
    name: *const c_char,
    rows: c_uint,
    msb: c_int,
    lsb: c_int,
    flags: c_int,
) -> *mut Lxt2WrSymbol {
    clear_error();
    let Some(lt) = (unsafe { trace_mut(lt) }) else {
        return ptr::null_mut();
    };
    let Some(name) = (unsafe { c_str(name) }) else {
        set_error("Null or invalid symbol name".to_string());
        return ptr::null_mut();
    };
    match lt.inner.add(name, rows, msb, lsb, SignalFlags::from_bits(flags as u32)) {
        Ok(id) => lt.symbol(id),
        Err(e) => {
            set_error(e.to_string());
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_symbol_alias(
    lt: *mut Lxt2WrTrace,
    existing_name: *const c_char,
    alias: *const c_char,
    msb: c_int,
    lsb: c_int,
) -> *mut Lxt2WrSymbol {
    clear_error();
    let Some(lt) = (unsafe { trace_mut(lt) }) else {
        return ptr::null_mut();
    };
    let (Some(existing), Some(alias)) = (unsafe { (c_str(existing_name), c_str(alias)) }) else {
        set_error("Null or invalid symbol name".to_string());
        return ptr::null_mut();
    };
    match lt.inner.alias(existing, alias, msb, lsb) {
        Ok(id) => lt.symbol(id),
        Err(e) => {
            set_error(e.to_string());
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_symbol_find(lt: *mut Lxt2WrTrace, name: *const c_char) -> *mut Lxt2WrSymbol {
    let (Some(lt), Some(name)) = (unsafe { (trace_mut(lt), c_str(name)) }) else {
        return ptr::null_mut();
    };
    match lt.inner.find(name) {
        Some(id) => lt.symbol(id),
        None => ptr::null_mut(),
    }
}

// ============================================================================
// Time and dump control
// ============================================================================

fn time_result(result: crate::error::Result<()>) -> c_int {
    match result {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.to_string());
            0
        }
    }
}

/// Returns 1 on success, 0 for a null trace or a receding time.
#[no_mangle]
pub extern "C" fn lxt2_wr_set_time(lt: *mut Lxt2WrTrace, timeval: c_uint) -> c_int {
    match unsafe { trace_mut(lt) } {
        Some(lt) => time_result(lt.inner.set_time(timeval)),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_time64(lt: *mut Lxt2WrTrace, timeval: u64) -> c_int {
    match unsafe { trace_mut(lt) } {
        Some(lt) => time_result(lt.inner.set_time64(timeval)),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_inc_time_by_delta(lt: *mut Lxt2WrTrace, timeval: c_uint) -> c_int {
    match unsafe { trace_mut(lt) } {
        Some(lt) => time_result(lt.inner.inc_time_by_delta(timeval)),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_inc_time_by_delta64(lt: *mut Lxt2WrTrace, timeval: u64) -> c_int {
    match unsafe { trace_mut(lt) } {
        Some(lt) => time_result(lt.inner.inc_time_by_delta64(timeval)),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_dumpoff(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.dump_off();
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_set_dumpon(lt: *mut Lxt2WrTrace) {
    if let Some(lt) = unsafe { trace_mut(lt) } {
        lt.inner.dump_on();
    }
}

// ============================================================================
// Value emission
// ============================================================================
//
// `row` is accepted for source compatibility; array rows are not recorded.
// Each function returns 1 when the value was recorded or matched the stored
// value, and 0 when it was rejected.

fn emitted(outcome: Emitted) -> c_int {
    outcome.is_accepted() as c_int
}

#[no_mangle]
pub extern "C" fn lxt2_wr_emit_value_int(
    lt: *mut Lxt2WrTrace,
    s: *mut Lxt2WrSymbol,
    _row: c_uint,
    value: c_int,
) -> c_int {
    match unsafe { (trace_mut(lt), symbol_id(s)) } {
        (Some(lt), Some(id)) => emitted(lt.inner.emit_int(id, value)),
        _ => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_emit_value_double(
    lt: *mut Lxt2WrTrace,
    s: *mut Lxt2WrSymbol,
    _row: c_uint,
    value: c_double,
) -> c_int {
    match unsafe { (trace_mut(lt), symbol_id(s)) } {
        (Some(lt), Some(id)) => emitted(lt.inner.emit_double(id, value)),
        _ => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_emit_value_string(
    lt: *mut Lxt2WrTrace,
    s: *mut Lxt2WrSymbol,
    _row: c_uint,
    value: *const c_char,
) -> c_int {
    match unsafe { (trace_mut(lt), symbol_id(s), c_bytes(value)) } {
        (Some(lt), Some(id), Some(value)) => emitted(lt.inner.emit_string(id, value)),
        _ => 0,
    }
}

#[no_mangle]
pub extern "C" fn lxt2_wr_emit_value_bit_string(
    lt: *mut Lxt2WrTrace,
    s: *mut Lxt2WrSymbol,
    _row: c_uint,
    value: *const c_char,
) -> c_int {
    match unsafe { (trace_mut(lt), symbol_id(s), c_bytes(value)) } {
        (Some(lt), Some(id), Some(value)) => emitted(lt.inner.emit_bits(id, value)),
        _ => 0,
    }
}
