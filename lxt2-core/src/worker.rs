//! Background Trace Writer
//!
//! Moves encoding and file I/O off the simulation thread. The producer
//! posts commands into a bounded channel; one consumer thread applies them
//! to the [`Trace`] strictly in order.
//!
//! # Design
//!
//! ```text
//! set_time / emit_* ──► crossbeam bounded channel ──► writer thread ──► Trace
//!        │                        │
//!        │                        └─ full queue blocks the producer
//!        └─ stamps every later command with the time
//! ```
//!
//! `finish()` posts a terminate command, joins the thread and hands the
//! drained [`Trace`] back so it can be closed on the caller's thread.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::config::WorkerConfig;
use crate::error::{Lxt2Error, Result};
use crate::signal::SignalId;
use crate::trace::Trace;

/// Commands sent to the writer thread
enum WorkItem {
    Bits { time: u64, id: SignalId, value: Vec<u8> },
    Double { time: u64, id: SignalId, value: f64 },
    Text { time: u64, id: SignalId, value: Vec<u8> },
    Flush { time: u64 },
    DumpOff { time: u64 },
    DumpOn { time: u64 },
    Sync(Sender<()>),
    Terminate,
}

/// Handle to a trace being written on its own thread
pub struct TraceWorker {
    sender: Sender<WorkItem>,
    /// Time stamped onto commands posted from now on
    time: u64,
    handle: Option<JoinHandle<Trace>>,
}

impl TraceWorker {
    /// Start the writer thread; it owns `trace` until [`finish`](Self::finish)
    pub fn spawn(trace: Trace, config: WorkerConfig) -> Result<Self> {
        let (sender, receiver) = channel::bounded(config.capacity.max(1));
        let handle = thread::Builder::new()
            .name("lxt2-writer".to_string())
            .spawn(move || Self::drain(receiver, trace))?;

        tracing::debug!(capacity = config.capacity, "trace writer started");
        Ok(Self {
            sender,
            time: 0,
            handle: Some(handle),
        })
    }

    /// Consumer loop
    fn drain(receiver: Receiver<WorkItem>, mut trace: Trace) -> Trace {
        let mut applied = 0u64;
        let mut processed = 0u64;

        for item in receiver.iter() {
            let time = match &item {
                WorkItem::Bits { time, .. }
                | WorkItem::Double { time, .. }
                | WorkItem::Text { time, .. }
                | WorkItem::Flush { time }
                | WorkItem::DumpOff { time }
                | WorkItem::DumpOn { time } => Some(*time),
                WorkItem::Sync(_) | WorkItem::Terminate => None,
            };
            if let Some(time) = time {
                if time != applied {
                    if let Err(err) = trace.set_time64(time) {
                        tracing::warn!(error = %err, "dropping time update");
                    }
                    applied = time;
                }
            }

            match item {
                WorkItem::Bits { id, value, .. } => {
                    trace.emit_bits(id, value);
                }
                WorkItem::Double { id, value, .. } => {
                    trace.emit_double(id, value);
                }
                WorkItem::Text { id, value, .. } => {
                    trace.emit_string(id, value);
                }
                WorkItem::Flush { .. } => trace.flush(),
                WorkItem::DumpOff { .. } => trace.dump_off(),
                WorkItem::DumpOn { .. } => trace.dump_on(),
                WorkItem::Sync(reply) => {
                    let _ = reply.send(());
                }
                WorkItem::Terminate => break,
            }
            processed += 1;
        }

        tracing::debug!(processed, "trace writer drained");
        trace
    }

    fn post(&self, item: WorkItem) -> Result<()> {
        self.sender.send(item).map_err(|_| Lxt2Error::WorkerStopped {
            reason: "writer thread is gone".to_string(),
        })
    }

    /// Time for commands posted after this call
    pub fn set_time(&mut self, time: u64) {
        self.time = time;
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn emit_bits<V: Into<Vec<u8>>>(&self, id: SignalId, value: V) -> Result<()> {
        self.post(WorkItem::Bits {
            time: self.time,
            id,
            value: value.into(),
        })
    }

    pub fn emit_double(&self, id: SignalId, value: f64) -> Result<()> {
        self.post(WorkItem::Double {
            time: self.time,
            id,
            value,
        })
    }

    pub fn emit_string<V: Into<Vec<u8>>>(&self, id: SignalId, value: V) -> Result<()> {
        self.post(WorkItem::Text {
            time: self.time,
            id,
            value: value.into(),
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.post(WorkItem::Flush { time: self.time })
    }

    pub fn dump_off(&self) -> Result<()> {
        self.post(WorkItem::DumpOff { time: self.time })
    }

    pub fn dump_on(&self) -> Result<()> {
        self.post(WorkItem::DumpOn { time: self.time })
    }

    /// Block until every command posted so far has been applied
    pub fn sync(&self) -> Result<()> {
        let (reply, done) = channel::bounded(1);
        self.post(WorkItem::Sync(reply))?;
        done.recv().map_err(|_| Lxt2Error::WorkerStopped {
            reason: "writer thread exited before sync".to_string(),
        })
    }

    /// Stop the writer thread and take the trace back
    pub fn finish(mut self) -> Result<Trace> {
        let _ = self.sender.send(WorkItem::Terminate);
        self.join()
    }

    fn join(&mut self) -> Result<Trace> {
        let handle = self.handle.take().ok_or_else(|| Lxt2Error::WorkerStopped {
            reason: "writer thread already joined".to_string(),
        })?;
        handle.join().map_err(|_| Lxt2Error::WorkerStopped {
            reason: "writer thread panicked".to_string(),
        })
    }
}

impl Drop for TraceWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.sender.send(WorkItem::Terminate);
            if let Ok(trace) = self.join() {
                if let Err(err) = trace.close() {
                    tracing::warn!(error = %err, "closing trace dropped with its writer");
                }
            }
        }
    }
}
