//! Counting semaphore with causality tracing.
//!
//! Waiters are granted units in strict FIFO order. Every lifecycle and
//! synchronization event (construction, destruction, signal, wait, wait
//! completion) is reported to the tracer, so the offline graph can link a
//! blocked waiter to the signal that eventually releases it.

use crate::runtime::promise::{pair, Eventual, Promise};
use crate::trace;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

struct SemWaiter {
    units: u64,
    promise: Promise<()>,
}

pub(crate) struct SemInner {
    units: Cell<u64>,
    waiters: RefCell<VecDeque<SemWaiter>>,
}

impl SemInner {
    fn address(&self) -> usize {
        std::ptr::addr_of!(*self) as usize
    }
}

impl Drop for SemInner {
    fn drop(&mut self) {
        trace::trace_semaphore_destructor(self.address(), self.units.get());
    }
}

/// A counting semaphore for shard-local fibers.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<SemInner>,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("units", &self.inner.units.get())
            .field("waiters", &self.inner.waiters.borrow().len())
            .finish()
    }
}

impl Semaphore {
    /// Creates a semaphore holding `units` free units.
    #[must_use]
    pub fn new(units: u64) -> Self {
        let inner = Rc::new(SemInner {
            units: Cell::new(units),
            waiters: RefCell::new(VecDeque::new()),
        });
        trace::trace_semaphore_constructor(inner.address(), units);
        Self { inner }
    }

    /// The semaphore's address identity.
    #[must_use]
    pub fn address(&self) -> usize {
        self.inner.address()
    }

    /// Currently free units.
    #[must_use]
    pub fn available_units(&self) -> u64 {
        self.inner.units.get()
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Takes `units` without suspending, or reports failure.
    ///
    /// Fails when units are short or earlier waiters are still queued.
    pub fn try_wait(&self, units: u64) -> bool {
        if self.inner.waiters.borrow().is_empty() && self.inner.units.get() >= units {
            let addr = self.address();
            let (promise, _eventual) = pair::<()>();
            trace::trace_semaphore_wait(
                addr,
                units,
                &trace::current_traced_vertex(),
                &promise.vertex(),
            );
            self.inner.units.set(self.inner.units.get() - units);
            trace::trace_semaphore_wait_completed(addr, &promise.vertex());
            promise.set_value(());
            return true;
        }
        false
    }

    /// Acquires `units`, suspending until they are available.
    ///
    /// Emits the wait event up front (with the current vertex as `pre` and
    /// the wait's promise as `post`); the completion event follows when the
    /// units are actually granted.
    pub fn wait(&self, units: u64) -> Eventual<()> {
        let addr = self.address();
        let (promise, eventual) = pair::<()>();
        trace::trace_semaphore_wait(
            addr,
            units,
            &trace::current_traced_vertex(),
            &promise.vertex(),
        );
        if self.inner.waiters.borrow().is_empty() && self.inner.units.get() >= units {
            self.inner.units.set(self.inner.units.get() - units);
            trace::trace_semaphore_wait_completed(addr, &promise.vertex());
            promise.set_value(());
        } else {
            self.inner
                .waiters
                .borrow_mut()
                .push_back(SemWaiter { units, promise });
        }
        eventual
    }

    /// Returns `units` and grants as many queued waiters as now fit.
    pub fn signal(&self, units: u64) {
        let addr = self.address();
        trace::trace_semaphore_signal(addr, units, &trace::current_traced_vertex());
        self.inner.units.set(self.inner.units.get() + units);
        loop {
            let granted = {
                let mut waiters = self.inner.waiters.borrow_mut();
                let fits = waiters
                    .front()
                    .is_some_and(|front| front.units <= self.inner.units.get());
                if fits {
                    waiters.pop_front()
                } else {
                    None
                }
            };
            let Some(waiter) = granted else { break };
            self.inner
                .units
                .set(self.inner.units.get() - waiter.units);
            trace::trace_semaphore_wait_completed(addr, &waiter.promise.vertex());
            waiter.promise.set_value(());
        }
    }
}

/// Acquires `units`, runs `f`, and signals them back once `f`'s eventual
/// resolves.
#[track_caller]
pub fn with_units<T, F>(semaphore: &Semaphore, units: u64, f: F) -> Eventual<T>
where
    T: 'static,
    F: FnOnce() -> Eventual<T> + 'static,
{
    let release = semaphore.clone();
    semaphore.wait(units).then(move |()| {
        f().map(move |value| {
            release.signal(units);
            value
        })
    })
}
