//! The inheritable held-locks chain.
//!
//! Each task owns at most one chain node recording the mutexes it currently
//! holds. Continuation chaining creates a child node whose parent is the
//! creator's node, so ownership accumulated earlier in a fiber stays visible
//! to the scanner; releasing a lock that is not in the head node recurses
//! into the parents. A per-thread counter stamps every mutation, and
//! [`choose_newer_locks`] resolves which of two chains carries the fresher
//! information when a resumed task and a resolved promise both have one.

use crate::sync::mutex::MutexInner;
use crate::trace::hooks::ENABLED;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

thread_local! {
    static LOCK_COUNTER: Cell<u64> = const { Cell::new(1) };
}

fn next_stamp() -> u64 {
    LOCK_COUNTER.with(|counter| {
        let stamp = counter.get();
        counter.set(stamp + 1);
        stamp
    })
}

pub(crate) struct LockNode {
    owned: RefCell<HashMap<usize, Weak<MutexInner>>>,
    parent: Option<HeldLocks>,
    timestamp: Cell<u64>,
}

impl Drop for LockNode {
    fn drop(&mut self) {
        if ENABLED && !self.owned.borrow().is_empty() {
            tracing::warn!(
                target: "causetrace::deadlock",
                locks = self.owned.borrow().len(),
                "held_locks: freeing held locks with some locks left"
            );
        }
    }
}

/// A reference-counted handle to one node of a held-locks chain.
#[derive(Clone)]
pub struct HeldLocks {
    node: Rc<LockNode>,
}

impl std::fmt::Debug for HeldLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldLocks")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("owned", &self.owned_count())
            .field("timestamp", &self.timestamp())
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}

impl HeldLocks {
    /// The node's address identity, used by the scanner's visited set.
    #[must_use]
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.node) as usize
    }

    /// The chain's last-mutation stamp.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.node.timestamp.get()
    }

    /// Number of locks owned by this node (parents not included).
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.node.owned.borrow().len()
    }

    /// The inherited parent node, if any.
    #[must_use]
    pub fn parent(&self) -> Option<HeldLocks> {
        self.node.parent.clone()
    }

    /// True when the mutex at `addr` is owned by this node or a parent.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        if self.node.owned.borrow().contains_key(&addr) {
            return true;
        }
        self.parent().is_some_and(|parent| parent.contains(addr))
    }

    /// Records ownership of `mutex` in this node.
    ///
    /// Owning the same mutex twice in one node is a programming error.
    pub(crate) fn add_lock(&self, mutex: &Rc<MutexInner>) {
        if !ENABLED {
            return;
        }
        let addr = Rc::as_ptr(mutex) as usize;
        let mut owned = self.node.owned.borrow_mut();
        assert!(
            !owned.contains_key(&addr),
            "held_locks: lock {addr:#x} added twice"
        );
        owned.insert(addr, Rc::downgrade(mutex));
        self.node.timestamp.set(next_stamp());
    }

    /// Drops ownership of the mutex at `addr`, searching parents when it is
    /// not in this node. An unknown lock is a warning, not a fault.
    pub(crate) fn remove_lock(&self, addr: usize) {
        if !ENABLED {
            return;
        }
        self.node.timestamp.set(next_stamp());
        if self.node.owned.borrow_mut().remove(&addr).is_some() {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.remove_lock(addr);
            return;
        }
        tracing::warn!(
            target: "causetrace::deadlock",
            mutex = %format_args!("{addr:#x}"),
            "held_locks: removing non-existent lock"
        );
    }

    /// Iterates the mutexes owned by this node that are still alive.
    pub(crate) fn owned_mutexes(&self) -> Vec<Rc<MutexInner>> {
        self.node
            .owned
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Creates a fresh chain level inheriting `current`.
///
/// The child starts with the parent's timestamp, so it does not win
/// [`choose_newer_locks`] until a real lock event happens on it.
#[must_use]
pub fn new_lock_level(current: Option<&HeldLocks>) -> HeldLocks {
    let timestamp = current.map_or(0, HeldLocks::timestamp);
    HeldLocks {
        node: Rc::new(LockNode {
            owned: RefCell::new(HashMap::new()),
            parent: current.cloned(),
            timestamp: Cell::new(timestamp),
        }),
    }
}

/// Picks the chain carrying the newer information.
///
/// A missing operand loses; two missing operands yield nothing.
#[must_use]
pub fn choose_newer_locks(lhs: Option<HeldLocks>, rhs: Option<HeldLocks>) -> Option<HeldLocks> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => {
            if l.timestamp() < r.timestamp() {
                Some(r)
            } else {
                Some(l)
            }
        }
        (Some(l), None) => Some(l),
        (None, r) => r,
    }
}
