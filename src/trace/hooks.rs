//! The tracing hook surface installed into the host runtime.
//!
//! Every hook builds a tagged record and hands it to the per-thread
//! encoder. The process-wide `can_trace` flag gates the whole surface; the
//! per-thread `started_trace` flag gates the window between `start_tracing`
//! and `stop_tracing` on each shard. With the `deadlock-detection` feature
//! off, `ENABLED` is false and every hook body folds to nothing.

use crate::runtime::{gettid, Eventual};
use crate::trace::config::TraceConfig;
use crate::trace::record::{RecordKind, TraceRecord};
use crate::trace::tracer::{self, with_tracer, TraceError, TracerState};
use crate::trace::vertex::RuntimeVertex;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, RwLock};

/// Compile-time master switch for the whole deadlock-detection surface.
pub(crate) const ENABLED: bool = cfg!(feature = "deadlock-detection");

static CAN_TRACE: AtomicBool = AtomicBool::new(false);

thread_local! {
    static STARTED_TRACE: Cell<bool> = const { Cell::new(false) };
}

fn global_config() -> &'static RwLock<TraceConfig> {
    static CONFIG: OnceLock<RwLock<TraceConfig>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(TraceConfig::from_env()))
}

/// True when the process accepts trace events at all.
#[inline]
#[must_use]
pub fn can_trace() -> bool {
    ENABLED && CAN_TRACE.load(Ordering::Relaxed)
}

fn started_trace() -> bool {
    STARTED_TRACE.with(Cell::get)
}

/// Encodes and buffers `record` on this thread's tracer.
///
/// Quietly drops events outside a session window; within one, the tracer
/// must be running; anything else is a host-integration bug.
fn emit(record: TraceRecord) {
    if !can_trace() || !started_trace() {
        return;
    }
    let _ = tracer::try_with_tracer(|tracer| {
        debug_assert_eq!(
            tracer.state(),
            TracerState::Running,
            "session window open but tracer not running"
        );
        tracer.write_record(record);
    });
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Arms tracing process-wide and pins the monotonic epoch.
///
/// Runs during quiescent startup, before any shard emits events.
pub fn init_tracing(config: TraceConfig) {
    if !ENABLED {
        return;
    }
    tracer::init_epoch();
    *global_config().write().expect("trace config poisoned") = config;
    CAN_TRACE.store(true, Ordering::Relaxed);
}

/// Opens this shard's dump file and starts accepting events.
///
/// The host broadcasts this to every shard (`smp::invoke_on_all`); each
/// shard's file is named by its kernel thread id.
pub fn start_tracing() -> Result<(), TraceError> {
    if !ENABLED {
        return Ok(());
    }
    let (path, min_chunks) = {
        let config = global_config().read().expect("trace config poisoned");
        (config.dump_path(gettid()), config.min_chunk_count)
    };
    with_tracer(|tracer| tracer.start(&path, min_chunks))?;
    STARTED_TRACE.with(|started| started.set(true));
    Ok(())
}

/// Closes this shard's session: flushes, truncates to the exact byte
/// count, and closes the dump file.
///
/// Events issued on this shard after the call are dropped.
pub fn stop_tracing() -> Eventual<Result<(), TraceError>> {
    if !ENABLED {
        return Eventual::ready(Ok(()));
    }
    STARTED_TRACE.with(|started| started.set(false));
    with_tracer(crate::trace::tracer::Tracer::stop)
}

/// Disarms tracing process-wide.
pub fn delete_tracing() {
    if !ENABLED {
        return;
    }
    CAN_TRACE.store(false, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Vertex hooks
// ---------------------------------------------------------------------------

/// Records the creation of `vertex`.
pub fn trace_vertex_constructor(vertex: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    let mut record = TraceRecord::new(RecordKind::VertexCtor).vertex(vertex.clone());
    if let Some(extra) = vertex.extra() {
        record = record.extra(extra);
    }
    emit(record);
}

/// Records the destruction of `vertex`.
pub fn trace_vertex_destructor(vertex: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    emit(TraceRecord::new(RecordKind::VertexDtor).vertex(vertex.clone()));
}

/// Records the logical relocation of a vertex from `from` to `to`.
///
/// Semantically equivalent to *ctor(to); edge(from→to); dtor(from);
/// ctor(from)*, so the moved-from slot remains a valid, empty vertex. The
/// decoder performs that expansion.
pub fn trace_move_vertex(from: &RuntimeVertex, to: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    emit(
        TraceRecord::new(RecordKind::VertexMove)
            .vertex(to.clone())
            .pre(from.clone()),
    );
}

/// Records a happens-before edge `pre → post`.
///
/// `speculative` marks edges inferred by scanning rather than observed.
pub fn trace_edge(pre: &RuntimeVertex, post: &RuntimeVertex, speculative: bool) {
    if !can_trace() {
        return;
    }
    emit(
        TraceRecord::new(RecordKind::Edge)
            .pre(pre.clone())
            .vertex(post.clone())
            .flag(speculative),
    );
}

/// Attaches a callable's type name and definition site to `vertex`.
pub fn attach_func_type(
    vertex: &RuntimeVertex,
    func_type: &'static str,
    file: &'static str,
    line: u32,
) {
    if !can_trace() {
        return;
    }
    let mut record = TraceRecord::new(RecordKind::FuncType)
        .vertex(vertex.clone())
        .extra(format!("{file}:{line}"));
    record.func_type = Some(func_type);
    emit(record);
}

// ---------------------------------------------------------------------------
// Semaphore hooks
// ---------------------------------------------------------------------------

/// Records the construction of a semaphore holding `count` units.
pub fn trace_semaphore_constructor(sem: usize, count: u64) {
    if !can_trace() {
        return;
    }
    emit(TraceRecord::new(RecordKind::SemCtor).sem(sem).units(count));
}

/// Records the destruction of a semaphore holding `count` units.
pub fn trace_semaphore_destructor(sem: usize, count: u64) {
    if !can_trace() {
        return;
    }
    emit(TraceRecord::new(RecordKind::SemDtor).sem(sem).units(count));
}

/// Records the relocation of a semaphore from `from` to `to`.
pub fn trace_move_semaphore(from: usize, to: usize) {
    if !can_trace() {
        return;
    }
    let mut record = TraceRecord::new(RecordKind::SemMove).sem(to);
    record.pre = Some(RuntimeVertex::bare(from));
    emit(record);
}

/// Records `caller` returning `count` units.
pub fn trace_semaphore_signal(sem: usize, count: u64, caller: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    emit(
        TraceRecord::new(RecordKind::SemSignal)
            .sem(sem)
            .units(count)
            .vertex(caller.clone()),
    );
}

/// Records a wait for `count` units: `pre` is the waiter, `post` the
/// promise that fires when the units are granted.
pub fn trace_semaphore_wait(sem: usize, count: u64, pre: &RuntimeVertex, post: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    emit(
        TraceRecord::new(RecordKind::SemWait)
            .sem(sem)
            .units(count)
            .pre(pre.clone())
            .vertex(post.clone()),
    );
}

/// Records the grant of a previously recorded wait.
pub fn trace_semaphore_wait_completed(sem: usize, post: &RuntimeVertex) {
    if !can_trace() {
        return;
    }
    emit(
        TraceRecord::new(RecordKind::SemWaitCmpl)
            .sem(sem)
            .vertex(post.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_are_silent_when_disarmed() {
        // Tracing has not been armed on this thread: nothing may buffer.
        trace_vertex_constructor(&RuntimeVertex::task(0x10, None));
        trace_edge(
            &RuntimeVertex::null(),
            &RuntimeVertex::task(0x10, None),
            false,
        );
        trace_semaphore_constructor(0x20, 1);
        with_tracer(|tracer| {
            assert_eq!(tracer.buffered_bytes(), 0);
            assert_eq!(tracer.state(), TracerState::Disabled);
        });
    }

    #[test]
    fn started_flag_is_thread_local() {
        assert!(!started_trace());
    }
}
