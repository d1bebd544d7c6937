//! The shard-per-thread cooperative runtime shim.
//!
//! This is the minimal host the tracer integrates with: a single-threaded
//! continuation executor per OS thread, a future/promise pair whose wait
//! edges stay visible to the deadlock scanner, timers, a cooperative
//! condition variable, and the multi-shard control plane.
//!
//! Shards never share hot-path state. Everything in this module is
//! `!Send` by construction; cross-shard interaction happens only through
//! [`Smp::invoke_on_all`].

pub mod combinator;
pub mod condition;
pub mod executor;
pub mod promise;
pub mod smp;
pub mod task;

pub use combinator::{parallel_for_each, when_all};
pub use condition::Condition;
pub use executor::{sleep, spawn, Shard};
pub use promise::{pair, Eventual, Promise, PromiseCore};
pub use smp::{gettid, this_shard_id, Smp};
pub use task::{current_task, previous_tasks, task_count, Task};
