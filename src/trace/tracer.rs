//! The per-thread tracer: double-buffered accumulation and the drain loop.
//!
//! Producers append encoded records to the active buffer and never wait for
//! I/O. A background drain task swaps the active buffer with the write
//! buffer once enough whole chunks have accumulated, carries the partial
//! tail back, and issues one aligned direct-I/O write per swap. Stopping
//! flushes the remainder padded to a chunk boundary, then truncates the
//! file to its exact logical size.
//!
//! Lifecycle: `Disabled → Running → Flushing → Disabled`. Double starts,
//! stops of an idle tracer, and events during `Flushing` are
//! host-integration bugs and assert.

use crate::fs::DmaFile;
use crate::runtime::{spawn, Condition, Eventual};
use crate::trace::buffer::{ChunkBuffer, CHUNK_SIZE};
use crate::trace::intern::StringTable;
use crate::trace::record::{RecordKind, RecordValue, TraceRecord, WireRecord, WireVertex};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Instant;

/// Errors surfaced by the tracer lifecycle.
///
/// Drain-path I/O failures are fatal for the session: the drain loop stops
/// and the error is handed to whoever awaits `stop`.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The underlying file operation failed.
    #[error("trace I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The kernel accepted fewer bytes than one aligned write demanded.
    #[error("short direct-I/O write: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes the kernel accepted.
        written: usize,
        /// Bytes the drain loop asked for.
        expected: usize,
    },
}

/// Tracer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerState {
    /// No session active; events are dropped upstream.
    Disabled,
    /// Session active; the hot path accepts events.
    Running,
    /// Stop requested; the drain loop is writing the remainder.
    Flushing,
}

static TRACE_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the process's tracing epoch.
#[must_use]
pub fn monotonic_ns() -> u64 {
    TRACE_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Pins the tracing epoch; called once from `init_tracing`.
pub(crate) fn init_epoch() {
    let _ = TRACE_EPOCH.get_or_init(Instant::now);
}

/// One thread's tracer.
pub struct Tracer {
    state: Cell<TracerState>,
    trace_buffer: RefCell<ChunkBuffer>,
    write_buffer: RefCell<ChunkBuffer>,
    condition: Condition,
    disable_condition_signal: Cell<bool>,
    threshold: Cell<usize>,
    file: RefCell<Option<DmaFile>>,
    file_size: Cell<u64>,
    drain_done: RefCell<Option<Eventual<Result<(), TraceError>>>>,
    strings: RefCell<StringTable>,
    scratch: RefCell<Vec<u8>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("state", &self.state.get())
            .field("buffered", &self.trace_buffer.borrow().len())
            .field("file_size", &self.file_size.get())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static TRACER: Rc<Tracer> = Rc::new(Tracer::new());
}

/// Runs `f` against this thread's tracer.
pub fn with_tracer<R>(f: impl FnOnce(&Rc<Tracer>) -> R) -> R {
    TRACER.with(f)
}

/// Like [`with_tracer`], but survives thread teardown.
///
/// Destructors of runtime entities run while thread-locals are being torn
/// down in unspecified order; their trace events are dropped once the
/// tracer slot is gone.
pub(crate) fn try_with_tracer<R>(f: impl FnOnce(&Rc<Tracer>) -> R) -> Option<R> {
    TRACER.try_with(f).ok()
}

impl Tracer {
    fn new() -> Self {
        Self {
            state: Cell::new(TracerState::Disabled),
            trace_buffer: RefCell::new(ChunkBuffer::new()),
            write_buffer: RefCell::new(ChunkBuffer::new()),
            condition: Condition::new(),
            disable_condition_signal: Cell::new(false),
            threshold: Cell::new(CHUNK_SIZE * crate::trace::config::DEFAULT_MIN_CHUNK_COUNT),
            file: RefCell::new(None),
            file_size: Cell::new(0),
            drain_done: RefCell::new(None),
            strings: RefCell::new(StringTable::new()),
            scratch: RefCell::new(Vec::with_capacity(256)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TracerState {
        self.state.get()
    }

    /// Bytes currently buffered on the hot side.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.trace_buffer.borrow().len()
    }

    /// Opens the dump file and launches the drain loop.
    ///
    /// Must only be called on a `Disabled` tracer, from within a shard.
    pub fn start(self: &Rc<Self>, path: &Path, min_chunk_count: usize) -> Result<(), TraceError> {
        assert_eq!(
            self.state.get(),
            TracerState::Disabled,
            "tracer started twice"
        );
        let file = DmaFile::open_dma(path)?;
        *self.file.borrow_mut() = Some(file);
        self.file_size.set(0);
        self.trace_buffer.borrow_mut().reset();
        self.write_buffer.borrow_mut().reset();
        self.strings.borrow_mut().reset();
        self.disable_condition_signal.set(false);
        self.threshold.set(CHUNK_SIZE * min_chunk_count);
        self.state.set(TracerState::Running);

        let tracer = self.clone();
        let done = spawn(move || drain_step(tracer));
        *self.drain_done.borrow_mut() = Some(done);
        tracing::debug!(
            target: "causetrace::tracer",
            path = %path.display(),
            threshold = self.threshold.get(),
            "tracing started"
        );
        Ok(())
    }

    /// Requests a flush and resolves once the drain loop has written,
    /// truncated, and closed the file.
    ///
    /// Must only be called on a `Running` tracer.
    pub fn stop(self: &Rc<Self>) -> Eventual<Result<(), TraceError>> {
        assert_eq!(
            self.state.get(),
            TracerState::Running,
            "tracer stopped while not running"
        );
        self.state.set(TracerState::Flushing);
        self.condition.signal();
        let done = self
            .drain_done
            .borrow_mut()
            .take()
            .expect("drain task missing");
        let tracer = self.clone();
        done.map(move |result| {
            tracer.state.set(TracerState::Disabled);
            tracing::debug!(target: "causetrace::tracer", ok = result.is_ok(), "tracing stopped");
            result
        })
    }

    /// Encodes and buffers one record. The caller has already established
    /// that tracing is enabled and this thread's session is running.
    pub(crate) fn write_record(&self, record: TraceRecord) {
        debug_assert_eq!(
            self.state.get(),
            TracerState::Running,
            "trace event outside a running session"
        );
        let vertex_type = record
            .vertex
            .as_ref()
            .and_then(|v| v.concrete_type())
            .map(|name| self.intern(name));
        let pre_type = record
            .pre
            .as_ref()
            .and_then(|v| v.concrete_type())
            .map(|name| self.intern(name));
        let value = record
            .func_type
            .map(|name| RecordValue::Units(u64::from(self.intern(name))))
            .or(record.value);

        let wire = WireRecord {
            kind: record.kind.expect("record kind missing").stable_name(),
            vertex: record
                .vertex
                .as_ref()
                .map(|v| WireVertex::from_vertex(v, vertex_type)),
            pre: record
                .pre
                .as_ref()
                .map(|v| WireVertex::from_vertex(v, pre_type)),
            sem: record.sem.map(|s| s as u64),
            value,
            extra: record.extra.as_deref(),
            timestamp: monotonic_ns(),
        };
        self.emit_line(&wire);
    }

    /// Interns `name`, emitting its `STRING_ID` record on first sight.
    fn intern(&self, name: &'static str) -> u32 {
        let (id, fresh) = self.strings.borrow_mut().intern(name);
        if fresh {
            let wire = WireRecord {
                kind: RecordKind::StringId.stable_name(),
                vertex: None,
                pre: None,
                sem: None,
                value: Some(RecordValue::Units(u64::from(id))),
                extra: Some(name),
                timestamp: monotonic_ns(),
            };
            self.emit_line(&wire);
        }
        id
    }

    /// Serializes one wire record and appends it to the active buffer,
    /// waking the drain loop on a threshold crossing.
    fn emit_line(&self, wire: &WireRecord<'_>) {
        let (before, after) = {
            let mut scratch = self.scratch.borrow_mut();
            scratch.clear();
            serde_json::to_writer(&mut *scratch, wire).expect("record serialization cannot fail");
            scratch.push(b'\n');
            let mut buffer = self.trace_buffer.borrow_mut();
            let before = buffer.len();
            buffer.extend_from_slice(&scratch);
            (before, buffer.len())
        };
        let threshold = self.threshold.get();
        if self.state.get() == TracerState::Running
            && !self.disable_condition_signal.get()
            && before < threshold
            && after >= threshold
        {
            // The flag fences the wakeup itself: resolving the condition's
            // promise emits trace records of its own.
            self.disable_condition_signal.set(true);
            self.condition.signal();
            self.disable_condition_signal.set(false);
        }
    }

    /// Swaps buffers and carries the partial tail back to the active side.
    /// Returns the offset and byte count for the aligned write.
    fn prepare_write(&self) -> (u64, usize) {
        let mut trace_buffer = self.trace_buffer.borrow_mut();
        let mut write_buffer = self.write_buffer.borrow_mut();
        debug_assert!(write_buffer.is_empty(), "write buffer busy");
        std::mem::swap(&mut *trace_buffer, &mut *write_buffer);
        let chunk_bytes = write_buffer.full_chunks() * CHUNK_SIZE;
        trace_buffer.extend_from_slice(&write_buffer.as_bytes()[chunk_bytes..]);
        (self.file_size.get(), chunk_bytes)
    }

    fn check_written(
        &self,
        result: std::io::Result<usize>,
        expected: usize,
    ) -> Result<(), TraceError> {
        let written = result?;
        if written != expected {
            return Err(TraceError::ShortWrite { written, expected });
        }
        Ok(())
    }
}

/// One turn of the drain loop.
///
/// Tail-recurses through the shard's run queue rather than looping, so the
/// wait on the condition and the (future-shaped) write both stay ordinary
/// suspension points.
fn drain_step(tracer: Rc<Tracer>) -> Eventual<Result<(), TraceError>> {
    if tracer.state.get() == TracerState::Flushing {
        return flush_remainder(tracer);
    }
    if tracer.buffered_bytes() < tracer.threshold.get() {
        let wakeup = tracer.condition.wait();
        return wakeup.then(move |()| drain_step(tracer));
    }

    let (offset, chunk_bytes) = tracer.prepare_write();
    let write = {
        let write_buffer = tracer.write_buffer.borrow();
        let file = tracer.file.borrow();
        let file = file.as_ref().expect("tracer file open while running");
        file.write_dma(offset, &write_buffer.as_bytes()[..chunk_bytes])
    };
    write.then(move |result| {
        if let Err(err) = tracer.check_written(result, chunk_bytes) {
            tracing::error!(target: "causetrace::tracer", error = %err, "drain write failed");
            return Eventual::ready(Err(err));
        }
        tracer.file_size.set(offset + chunk_bytes as u64);
        tracer.write_buffer.borrow_mut().reset();
        drain_step(tracer)
    })
}

/// The flush path: pad the remainder to whole chunks, write once, truncate
/// the padding away, then flush and close.
fn flush_remainder(tracer: Rc<Tracer>) -> Eventual<Result<(), TraceError>> {
    let (offset, logical, padded) = {
        let mut trace_buffer = tracer.trace_buffer.borrow_mut();
        let mut write_buffer = tracer.write_buffer.borrow_mut();
        debug_assert!(write_buffer.is_empty(), "write buffer busy at flush");
        std::mem::swap(&mut *trace_buffer, &mut *write_buffer);
        (
            tracer.file_size.get(),
            write_buffer.len(),
            write_buffer.padded_len(),
        )
    };

    let write = if padded == 0 {
        Eventual::ready(Ok(0))
    } else {
        let write_buffer = tracer.write_buffer.borrow();
        let file = tracer.file.borrow();
        let file = file.as_ref().expect("tracer file open while flushing");
        file.write_dma(offset, write_buffer.padded_bytes())
    };

    write.then(move |result| {
        if let Err(err) = tracer.check_written(result, padded) {
            tracing::error!(target: "causetrace::tracer", error = %err, "flush write failed");
            return Eventual::ready(Err(err));
        }
        tracer.file_size.set(offset + logical as u64);
        tracer.write_buffer.borrow_mut().reset();

        let truncate = {
            let file = tracer.file.borrow();
            let file = file.as_ref().expect("tracer file open while flushing");
            file.truncate(tracer.file_size.get())
        };
        truncate.then(move |result| {
            if let Err(err) = result {
                return Eventual::ready(Err(err.into()));
            }
            let flush = {
                let file = tracer.file.borrow();
                let file = file.as_ref().expect("tracer file open while flushing");
                file.flush()
            };
            flush.then(move |result| {
                if let Err(err) = result {
                    return Eventual::ready(Err(err.into()));
                }
                let file = tracer
                    .file
                    .borrow_mut()
                    .take()
                    .expect("tracer file open while flushing");
                file.close().map(|result| result.map_err(Into::into))
            })
        })
    })
}
