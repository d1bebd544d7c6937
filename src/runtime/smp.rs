//! Multi-shard control plane.
//!
//! Shards are OS threads, each running its own single-threaded executor.
//! They share no hot-path state; the only cross-shard operation is the
//! lifecycle broadcast that runs a closure on every shard and joins.

#![allow(unsafe_code)]

use std::cell::Cell;

thread_local! {
    static SHARD_ID: Cell<u32> = const { Cell::new(0) };
}

/// This shard's id, 0-based.
///
/// Threads outside an [`Smp::invoke_on_all`] broadcast report shard 0.
#[must_use]
pub fn this_shard_id() -> u32 {
    SHARD_ID.with(Cell::get)
}

/// The kernel thread id, used to name per-thread dump files.
///
/// Thread ids stay unique across non-reactor threads, which shard ids do
/// not.
#[must_use]
#[cfg(target_os = "linux")]
pub fn gettid() -> u64 {
    // SAFETY: gettid has no preconditions and cannot fail.
    (unsafe { libc::gettid() }) as u64
}

/// The kernel thread id, used to name per-thread dump files.
#[must_use]
#[cfg(not(target_os = "linux"))]
pub fn gettid() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TID.with(|tid| *tid)
}

/// The shard set.
#[derive(Debug)]
pub struct Smp;

impl Smp {
    /// Runs `f` once on each of `shards` fresh shard threads and joins.
    ///
    /// Each thread gets its own executor, tracer, task list, and mutex
    /// activity index; `f` receives the shard id. Panics on any shard
    /// propagate to the caller after all shards have been joined.
    pub fn invoke_on_all<F>(shards: u32, f: F)
    where
        F: Fn(u32) + Send + Sync,
    {
        assert!(shards > 0, "shard count must be positive");
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = (0..shards)
                .map(|shard| {
                    std::thread::Builder::new()
                        .name(format!("shard-{shard}"))
                        .spawn_scoped(scope, move || {
                            SHARD_ID.with(|id| id.set(shard));
                            f(shard);
                        })
                        .expect("failed to spawn shard thread")
                })
                .collect();
            for handle in handles {
                if let Err(panic) = handle.join() {
                    std::panic::resume_unwind(panic);
                }
            }
        });
    }
}
