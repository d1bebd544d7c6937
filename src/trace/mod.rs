//! The causality tracer.
//!
//! # Submodules
//!
//! - [`vertex`]: type-erased runtime vertices
//! - [`current`]: the per-thread current-vertex register and scoped guard
//! - [`record`]: trace records and their NDJSON wire form
//! - [`intern`]: per-thread string-id table
//! - [`buffer`]: page-aligned chunk buffer
//! - [`tracer`]: per-thread double-buffered tracer and drain loop
//! - [`hooks`]: the public hook surface and session lifecycle
//! - [`decode`]: dump decoder and `VERTEX_MOVE` expansion
//! - [`config`]: output directory and drain-threshold configuration

pub mod buffer;
pub mod config;
pub mod current;
pub mod decode;
pub mod hooks;
pub mod intern;
pub mod record;
pub mod tracer;
pub mod vertex;

pub use buffer::{ChunkBuffer, CHUNK_SIZE};
pub use config::TraceConfig;
pub use current::{current_traced_vertex, CurrentVertexGuard};
pub use decode::{
    decode_bytes, decode_file, expand_moves, string_table, DecodeError, DecodedRecord,
    DecodedValue, DecodedVertex,
};
pub use hooks::{
    attach_func_type, can_trace, delete_tracing, init_tracing, start_tracing, stop_tracing,
    trace_edge, trace_move_semaphore, trace_move_vertex, trace_semaphore_constructor,
    trace_semaphore_destructor, trace_semaphore_signal, trace_semaphore_wait,
    trace_semaphore_wait_completed, trace_vertex_constructor, trace_vertex_destructor,
};
pub use intern::StringTable;
pub use record::{RecordKind, RecordValue, TraceRecord};
pub use tracer::{monotonic_ns, with_tracer, TraceError, Tracer, TracerState};
pub use vertex::{RuntimeVertex, VertexKind};
