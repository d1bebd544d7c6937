//! The deadlockable mutex.
//!
//! A lock with an `open` flag and a promise wait list, built for the
//! scanner: every operation refreshes the activity index, acquisition
//! records ownership in the current task's held-locks chain, and handing
//! the lock to a queued waiter moves that ownership into the waiter's
//! chain before its promise fires.
//!
//! Unlike the semaphore, the mutex emits no trace records of its own; it
//! is observed by the in-process scanner, not the offline graph.

use crate::runtime::promise::{pair, Eventual, Promise};
use crate::runtime::task::current_task;
use crate::sync::activity;
use crate::sync::held_locks::new_lock_level;
use crate::trace::hooks::ENABLED;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Error raised by misuse of the mutex surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// `signal` was called on a mutex that is already open.
    #[error("unlocked lock can't be unlocked")]
    AlreadyUnlocked,
}

pub(crate) struct MutexInner {
    open: Cell<bool>,
    wait_list: RefCell<VecDeque<Promise<()>>>,
}

impl MutexInner {
    pub(crate) fn address(&self) -> usize {
        std::ptr::addr_of!(*self) as usize
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.get()
    }

    pub(crate) fn waiting_promises(&self) -> Vec<Rc<crate::runtime::PromiseCore>> {
        self.wait_list
            .borrow()
            .iter()
            .map(|promise| promise.core().clone())
            .collect()
    }
}

impl Drop for MutexInner {
    fn drop(&mut self) {
        if !self.open.get() {
            tracing::warn!(
                target: "causetrace::deadlock",
                mutex = %format_args!("{:#x}", self.address()),
                "mutex: deleting locked mutex"
            );
        }
        activity::delete_mutex(self.address());
    }
}

/// A cooperative mutex watched by the inactive-mutex scanner.
#[derive(Clone)]
pub struct Mutex {
    inner: Rc<MutexInner>,
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("open", &self.inner.open.get())
            .field("waiters", &self.inner.wait_list.borrow().len())
            .finish()
    }
}

impl Mutex {
    /// Creates an open mutex and registers it with the activity index.
    #[must_use]
    pub fn new() -> Self {
        let inner = Rc::new(MutexInner {
            open: Cell::new(true),
            wait_list: RefCell::new(VecDeque::new()),
        });
        activity::register_activity(&inner);
        Self { inner }
    }

    /// The mutex's address identity.
    #[must_use]
    pub fn address(&self) -> usize {
        self.inner.address()
    }

    /// True while some fiber holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.inner.open.get()
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.wait_list.borrow().len()
    }

    pub(crate) fn inner(&self) -> &Rc<MutexInner> {
        &self.inner
    }

    /// Acquires the lock, suspending when it is already held.
    ///
    /// On immediate acquisition the current task's held-locks chain (created
    /// on demand) records the ownership, and the chain rides on the returned
    /// eventual so continuations inherit it.
    pub fn wait(&self) -> Eventual<()> {
        if self.inner.open.get() {
            activity::register_activity(&self.inner);
            self.inner.open.set(false);
            let (promise, eventual) = pair::<()>();
            if ENABLED {
                let task = current_task().expect("mutex locked outside a task");
                if task.held_locks().is_none() {
                    task.set_held_locks(Some(new_lock_level(None)));
                }
                let chain = task.held_locks().expect("chain just installed");
                chain.add_lock(&self.inner);
                promise.core().set_held_locks(chain);
            }
            promise.set_value(());
            return eventual;
        }
        let (promise, eventual) = pair::<()>();
        self.inner.wait_list.borrow_mut().push_back(promise);
        eventual
    }

    /// Releases the lock, handing it to the oldest waiter if one is queued.
    ///
    /// The releasing task's chain drops the mutex; the waiter's chain gains
    /// it before the waiter's promise fires.
    pub fn signal(&self) -> Result<(), LockError> {
        if self.inner.open.get() {
            tracing::warn!(
                target: "causetrace::deadlock",
                mutex = %format_args!("{:#x}", self.address()),
                "mutex: signal on an already-open mutex"
            );
            return Err(LockError::AlreadyUnlocked);
        }

        activity::register_activity(&self.inner);

        if ENABLED {
            match current_task() {
                Some(task) => match task.held_locks() {
                    Some(chain) => chain.remove_lock(self.address()),
                    None => tracing::warn!(
                        target: "causetrace::deadlock",
                        "mutex: no task locks in signal"
                    ),
                },
                None => tracing::warn!(
                    target: "causetrace::deadlock",
                    "mutex: no current task in signal"
                ),
            }
        }

        self.inner.open.set(true);

        let next = self.inner.wait_list.borrow_mut().pop_front();
        if let Some(promise) = next {
            self.inner.open.set(false);
            if ENABLED {
                if let Some(chain) = promise.core().held_locks() {
                    chain.add_lock(&self.inner);
                }
            }
            promise.set_value(());
        }
        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquires `mutex`, runs `f`, and releases once `f`'s eventual resolves.
#[track_caller]
pub fn with_lock<T, F>(mutex: &Mutex, f: F) -> Eventual<T>
where
    T: 'static,
    F: FnOnce() -> Eventual<T> + 'static,
{
    let release = mutex.clone();
    mutex.wait().then(move |()| {
        f().map(move |value| {
            if let Err(err) = release.signal() {
                tracing::warn!(target: "causetrace::deadlock", error = %err, "with_lock release failed");
            }
            value
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{spawn, Shard};
    use crate::test_utils::init_test_logging;

    #[test]
    fn uncontended_wait_acquires_immediately() {
        init_test_logging();
        Shard::run(|| {
            spawn(|| {
                let mutex = Mutex::new();
                let locked = mutex.clone();
                mutex.wait().map(move |()| {
                    assert!(locked.is_locked());
                    let task = current_task().expect("task");
                    let chain = task.held_locks().expect("chain");
                    assert!(chain.contains(locked.address()));
                    locked.signal().expect("signal");
                    assert!(!locked.is_locked());
                })
            })
        });
    }

    #[test]
    fn signal_on_open_mutex_is_an_error() {
        init_test_logging();
        Shard::run(|| {
            let mutex = Mutex::new();
            assert_eq!(mutex.signal(), Err(LockError::AlreadyUnlocked));
            Eventual::ready(())
        });
    }

    #[test]
    fn contended_wait_queues_and_hands_over() {
        init_test_logging();
        Shard::run(|| {
            spawn(|| {
                let mutex = Mutex::new();
                let m = mutex.clone();
                let first = mutex.wait();
                assert_eq!(mutex.waiter_count(), 0);
                let second = mutex.wait();
                assert_eq!(mutex.waiter_count(), 1);

                let holder = first.map(move |()| {
                    m.signal().expect("handover");
                });
                let m2 = mutex.clone();
                let waiter = second.map(move |()| {
                    assert!(m2.is_locked());
                    m2.signal().expect("release");
                });
                crate::runtime::when_all(vec![holder, waiter])
            })
        });
    }

    #[test]
    fn with_lock_releases_after_body() {
        init_test_logging();
        Shard::run(|| {
            spawn(|| {
                let mutex = Mutex::new();
                let observe = mutex.clone();
                with_lock(&mutex, move || {
                    assert!(observe.is_locked());
                    Eventual::ready(())
                })
                .map({
                    let mutex = mutex.clone();
                    move |()| assert!(!mutex.is_locked())
                })
            })
        });
    }
}
