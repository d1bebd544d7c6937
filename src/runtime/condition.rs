//! Cooperative condition variable.
//!
//! Single-shard flavour of an async notify primitive: waiters suspend on a
//! promise, signals wake one waiter in FIFO order, and a signal with no
//! waiter present is stored and consumed by the next wait, so the classic
//! "check the predicate, then wait" loop never misses a wakeup.

use crate::runtime::promise::{pair, Eventual, Promise};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// A condition variable for shard-local tasks.
#[derive(Debug, Default)]
pub struct Condition {
    waiters: RefCell<VecDeque<Promise<()>>>,
    stored: Cell<usize>,
}

impl Condition {
    /// Creates a condition with no waiters and no stored signals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next signal.
    ///
    /// Consumes a stored signal immediately when one is pending.
    pub fn wait(&self) -> Eventual<()> {
        let stored = self.stored.get();
        if stored > 0 {
            self.stored.set(stored - 1);
            return Eventual::ready(());
        }
        let (promise, eventual) = pair::<()>();
        self.waiters.borrow_mut().push_back(promise);
        eventual
    }

    /// Wakes one waiter, or stores the signal if none is waiting.
    pub fn signal(&self) {
        let waiter = self.waiters.borrow_mut().pop_front();
        match waiter {
            Some(promise) => promise.set_value(()),
            None => self.stored.set(self.stored.get() + 1),
        }
    }

    /// Wakes every currently registered waiter.
    pub fn broadcast(&self) {
        let drained: Vec<_> = self.waiters.borrow_mut().drain(..).collect();
        for promise in drained {
            promise.set_value(());
        }
    }

    /// Number of tasks currently waiting.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }
}
