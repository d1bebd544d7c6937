//! Causetrace: runtime causality tracing and deadlock scanning for a
//! shard-per-thread cooperative runtime.
//!
//! # Overview
//!
//! Causetrace records every creation, destruction, linkage, and
//! synchronization event among the entities of a cooperative task runtime
//! (tasks, promises, futures, and counting semaphores), producing one
//! append-only event stream per OS thread. An offline tool reconstructs a
//! directed *happens-before* graph from those streams and searches it for
//! deadlocks. In-process, a lightweight scanner walks the live sub-graph of
//! mutexes, held-locks chains, promises, and tasks to flag cycles among
//! long-idle mutexes without waiting for the offline pass.
//!
//! # Module Structure
//!
//! - [`trace`]: vertex model, per-thread event encoder with string
//!   interning, double-buffered direct-I/O tracer, and the public hook
//!   surface installed into the host runtime
//! - [`sync`]: deadlockable mutex, counting semaphore, inheritable
//!   held-locks chain, and the inactive-mutex scanner
//! - [`runtime`]: minimal shard executor shim: continuation-chained
//!   future/promise pair, timers, cooperative condition variable, and the
//!   multi-shard control plane
//! - [`fs`]: the direct-I/O file the tracer drains into
//!
//! # Hot-Path Discipline
//!
//! Trace hooks never suspend and never wait for I/O. Serialized events land
//! in a page-aligned chunk buffer; a background drain task swaps buffers and
//! issues aligned writes. With the `deadlock-detection` feature disabled,
//! every hook compiles to a no-op with an unchanged signature.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod fs;
pub mod runtime;
pub mod sync;
pub mod test_utils;
pub mod trace;

pub use runtime::{
    current_task, parallel_for_each, sleep, spawn, when_all, Eventual, Promise, Shard,
};
pub use sync::{
    choose_newer_locks, find_inactive_mutexes, find_inactive_mutexes_at, new_lock_level,
    DeadlockReport, HeldLocks, LockError, Mutex, Semaphore,
};
pub use trace::{
    attach_func_type, current_traced_vertex, delete_tracing, init_tracing, start_tracing,
    stop_tracing, trace_edge, trace_move_vertex, trace_vertex_constructor,
    trace_vertex_destructor, CurrentVertexGuard, RuntimeVertex, TraceConfig, TraceError,
    VertexKind,
};
