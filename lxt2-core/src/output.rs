//! Positioned big-endian writer with optional gzip members
//!
//! The container mixes raw fields with gzip members that are opened and
//! closed at block boundaries, and patches earlier raw fields once sizes
//! are known. Writes are best effort: a failure is logged and remembered,
//! and the writer keeps going so the size bookkeeping stays consistent.

use std::io::{self, Seek, SeekFrom, Write};

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};

use crate::error::fatal;
use crate::storage::TraceStream;

/// Operating system byte zlib stamps into gzip headers on Unix
const GZIP_OS_UNIX: u8 = 3;

enum Sink {
    Raw(Box<dyn TraceStream>),
    Member(GzEncoder<Box<dyn TraceStream>>),
}

/// Bytes from `start + header` up to `end`, when both offsets are known
pub(crate) fn span(start: Option<u64>, header: u64, end: Option<u64>) -> Option<u64> {
    end?.checked_sub(start?.checked_add(header)?)
}

/// Write-side I/O failures seen so far
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub count: u64,
    pub first: Option<io::Error>,
}

pub(crate) struct Output {
    sink: Option<Sink>,
    /// Uncompressed bytes written through the open member
    zcount: u64,
    /// Bytes written since the last sync flush
    unflushed: bool,
    faults: Faults,
}

impl Output {
    pub fn new(stream: Box<dyn TraceStream>) -> Self {
        Output {
            sink: Some(Sink::Raw(stream)),
            zcount: 0,
            unflushed: false,
            faults: Faults::default(),
        }
    }

    fn fault(&mut self, context: &str, err: io::Error) {
        self.faults.count += 1;
        if self.faults.first.is_none() {
            tracing::warn!(error = %err, context, "trace write failed; continuing best effort");
            self.faults.first = Some(err);
        } else {
            tracing::debug!(error = %err, context, "trace write failed");
        }
    }

    fn raw_stream(&mut self) -> Option<&mut Box<dyn TraceStream>> {
        match self.sink.as_mut()? {
            Sink::Raw(stream) => Some(stream),
            Sink::Member(_) => fatal("raw write while a compressed member is open"),
        }
    }

    pub fn put(&mut self, bytes: &[u8]) {
        let result = match self.raw_stream() {
            Some(stream) => stream.write_all(bytes),
            None => return,
        };
        if let Err(err) = result {
            self.fault("raw write", err);
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.put(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.put(&value.to_be_bytes());
    }

    /// Write through the open member
    pub fn zput(&mut self, bytes: &[u8]) {
        self.zcount += bytes.len() as u64;
        self.unflushed |= !bytes.is_empty();
        let result = match self.sink.as_mut() {
            Some(Sink::Member(encoder)) => encoder.write_all(bytes),
            Some(Sink::Raw(_)) => fatal("compressed write outside of a member"),
            None => return,
        };
        if let Err(err) = result {
            self.fault("compressed write", err);
        }
    }

    pub fn zput_u8(&mut self, value: u8) {
        self.zput(&[value]);
    }

    pub fn zput_u16(&mut self, value: u16) {
        self.zput(&value.to_be_bytes());
    }

    pub fn zput_u32(&mut self, value: u32) {
        self.zput(&value.to_be_bytes());
    }

    pub fn zput_u64(&mut self, value: u64) {
        self.zput(&value.to_be_bytes());
    }

    /// Low `width` bytes of `value`, big-endian; `width` is 1..=4
    pub fn zput_be(&mut self, value: u32, width: u8) {
        let bytes = value.to_be_bytes();
        self.zput(&bytes[4 - usize::from(width)..]);
    }

    /// NUL-terminated byte string
    pub fn zput_cstr(&mut self, value: &[u8]) {
        self.zput(value);
        self.zput(&[0]);
    }

    /// Open a gzip member at `level` at the current position
    pub fn begin_member(&mut self, level: u32) {
        let stream = match self.sink.take() {
            Some(Sink::Raw(stream)) => stream,
            Some(Sink::Member(_)) => fatal("gzip member opened twice"),
            None => return,
        };
        let encoder = GzBuilder::new()
            .operating_system(GZIP_OS_UNIX)
            .write(stream, Compression::new(level));
        self.sink = Some(Sink::Member(encoder));
        self.zcount = 0;
        self.unflushed = false;
    }

    /// Sync-flush the open member if anything was written since the last
    /// flush
    pub fn sync_flush(&mut self) {
        if !self.unflushed {
            return;
        }
        self.unflushed = false;
        let result = match self.sink.as_mut() {
            Some(Sink::Member(encoder)) => encoder.flush(),
            _ => return,
        };
        if let Err(err) = result {
            self.fault("sync flush", err);
        }
    }

    /// Close the open member, writing its trailer
    pub fn end_member(&mut self) {
        let mut encoder = match self.sink.take() {
            Some(Sink::Member(encoder)) => encoder,
            Some(raw) => {
                self.sink = Some(raw);
                return;
            }
            None => return,
        };
        if let Err(err) = encoder.try_finish() {
            self.fault("gzip trailer", err);
        }
        match encoder.finish() {
            Ok(stream) => self.sink = Some(Sink::Raw(stream)),
            Err(err) => self.fault("closing gzip member", err),
        }
        self.unflushed = false;
    }

    /// Uncompressed bytes written through the current (or last) member
    pub fn zcount(&self) -> u64 {
        self.zcount
    }

    /// Move the cursor to the end of the part and return the offset, or
    /// `None` once the stream can no longer report one
    pub fn seek_end(&mut self) -> Option<u64> {
        let result = self.raw_stream()?.seek(SeekFrom::End(0));
        match result {
            Ok(offset) => Some(offset),
            Err(err) => {
                self.fault("seek to end", err);
                None
            }
        }
    }

    /// Offset of the underlying stream; lags behind while a member
    /// buffers data
    pub fn position(&mut self) -> u64 {
        let result = match self.sink.as_mut() {
            Some(Sink::Raw(stream)) => stream.stream_position(),
            Some(Sink::Member(encoder)) => encoder.get_mut().stream_position(),
            None => return 0,
        };
        result.unwrap_or_else(|err| {
            self.fault("stream position", err);
            0
        })
    }

    /// Overwrite raw fields at `offset`, then return the cursor to the end
    /// of the part.
    pub fn backpatch<F>(&mut self, offset: u64, patch: F)
    where
        F: FnOnce(&mut Output),
    {
        let result = match self.raw_stream() {
            Some(stream) => stream.seek(SeekFrom::Start(offset)),
            None => return,
        };
        match result {
            Ok(_) => patch(self),
            Err(err) => self.fault("seek to backpatch", err),
        }
        self.seek_end();
    }

    /// Swap in a new part; the old stream is flushed and returned
    pub fn replace_stream(&mut self, stream: Box<dyn TraceStream>) -> Option<Box<dyn TraceStream>> {
        self.end_member();
        let previous = match self.sink.replace(Sink::Raw(stream)) {
            Some(Sink::Raw(mut old)) => {
                if let Err(err) = old.flush() {
                    self.fault("flushing previous part", err);
                }
                Some(old)
            }
            _ => None,
        };
        self.zcount = 0;
        previous
    }

    /// Close any member and flush the part
    pub fn finish(&mut self) {
        self.end_member();
        let result = match self.sink.as_mut() {
            Some(Sink::Raw(stream)) => stream.flush(),
            _ => return,
        };
        if let Err(err) = result {
            self.fault("final flush", err);
        }
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.count
    }

    /// Hand over the first failure, if any
    pub fn take_first_fault(&mut self) -> Option<io::Error> {
        self.faults.first.take()
    }
}
