//! Synchronization primitives watched by the deadlock machinery.
//!
//! - [`Semaphore`]: counting semaphore whose every signal/wait lands in the
//!   trace stream
//! - [`Mutex`]: the deadlockable lock the in-process scanner watches
//! - [`HeldLocks`]: per-task chain of owned mutexes, inherited across
//!   continuations
//! - [`activity`]: the time-ordered mutex activity index and the
//!   inactive-mutex cycle scanner

pub mod activity;
pub mod held_locks;
pub mod mutex;
pub mod semaphore;

pub use activity::{
    find_inactive_mutexes, find_inactive_mutexes_at, DeadlockReport, NodeKind,
    MAX_INACTIVE_PERIOD,
};
pub use held_locks::{choose_newer_locks, new_lock_level, HeldLocks};
pub use mutex::{with_lock, LockError, Mutex};
pub use semaphore::{with_units, Semaphore};
