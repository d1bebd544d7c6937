//! Continuation-chained future/promise pair.
//!
//! A [`Promise`] is the producing half of a suspension point; an
//! [`Eventual`] is the consuming half. Chaining with [`Eventual::then`]
//! creates a continuation task that runs when the value arrives. The
//! type-erased [`PromiseCore`] carries everything the deadlock scanner needs
//! to traverse a suspension point: the task that will run when the promise
//! fires and the held-locks chain of the waiter.
//!
//! Resolving a waited promise merges lock ownership into the resumed task:
//! the newer of the task's and the promise's chains wins.

use crate::runtime::executor;
use crate::runtime::task::{current_task, Task};
use crate::sync::{choose_newer_locks, new_lock_level, HeldLocks};
use crate::trace::{self, RuntimeVertex};
use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::panic::Location;
use std::rc::Rc;

/// Type-erased shared state of one suspension point.
///
/// Lives as long as either half of the pair (or a scanner-visible wait
/// edge) does; its address is the promise's vertex identity.
pub struct PromiseCore {
    waiting_task: RefCell<Option<Rc<Task>>>,
    producer: RefCell<Option<std::rc::Weak<Task>>>,
    held: RefCell<Option<HeldLocks>>,
    resolved: Cell<bool>,
    value_type: &'static str,
}

impl std::fmt::Debug for PromiseCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseCore")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}

impl PromiseCore {
    /// The promise's address identity.
    #[must_use]
    pub fn address(&self) -> usize {
        std::ptr::addr_of!(*self) as usize
    }

    /// The promise's causality-graph vertex.
    #[must_use]
    pub fn vertex(&self) -> RuntimeVertex {
        RuntimeVertex::promise(self.address(), Some(self.value_type))
    }

    /// The task that will run when this promise fires, if registered.
    #[must_use]
    pub fn waiting_task(&self) -> Option<Rc<Task>> {
        self.waiting_task.borrow().clone()
    }

    /// The held-locks chain of the waiter, if any.
    #[must_use]
    pub fn held_locks(&self) -> Option<HeldLocks> {
        self.held.borrow().clone()
    }

    pub(crate) fn set_held_locks(&self, held: HeldLocks) {
        *self.held.borrow_mut() = Some(held);
    }

    /// True once the value has been produced.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get()
    }

    pub(crate) fn set_producer(&self, task: &Rc<Task>) {
        *self.producer.borrow_mut() = Some(Rc::downgrade(task));
    }
}

impl Drop for PromiseCore {
    fn drop(&mut self) {
        trace::trace_vertex_destructor(&self.vertex());
    }
}

enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
}

struct Shared<T> {
    core: Rc<PromiseCore>,
    slot: RefCell<Slot<T>>,
}

/// The producing half of a suspension point.
pub struct Promise<T> {
    shared: Rc<Shared<T>>,
}

/// The consuming half of a suspension point.
#[must_use = "an eventual does nothing unless chained or driven by the shard"]
pub struct Eventual<T> {
    shared: Rc<Shared<T>>,
}

/// Creates a connected promise/eventual pair.
pub fn pair<T: 'static>() -> (Promise<T>, Eventual<T>) {
    let core = Rc::new(PromiseCore {
        waiting_task: RefCell::new(None),
        producer: RefCell::new(None),
        held: RefCell::new(None),
        resolved: Cell::new(false),
        value_type: type_name::<T>(),
    });
    trace::trace_vertex_constructor(&core.vertex());
    let shared = Rc::new(Shared {
        core,
        slot: RefCell::new(Slot::Pending),
    });
    (
        Promise {
            shared: shared.clone(),
        },
        Eventual { shared },
    )
}

/// Schedules `task` as the consequence of `core` firing, merging lock
/// ownership: the newer of the task's and the promise's chains wins.
fn resume(core: &Rc<PromiseCore>, task: Rc<Task>) {
    let merged = choose_newer_locks(task.held_locks(), core.held_locks());
    task.set_held_locks(merged);
    trace::trace_edge(&core.vertex(), &task.vertex(), false);
    // The wait edge stays in place until after the scheduler has seen it;
    // a task with no known predecessor gets speculative edges instead.
    executor::schedule(task.clone());
    task.clear_waiting_promise();
}

/// Registers `task` to run when `core` fires.
fn register_waiter(core: &Rc<PromiseCore>, task: &Rc<Task>) {
    *core.waiting_task.borrow_mut() = Some(task.clone());
    task.set_waiting_promise(core);
    if core.held_locks().is_none() {
        if let Some(chain) = task.held_locks() {
            core.set_held_locks(chain);
        }
    }
    let producer = core.producer.borrow().clone();
    if let Some(producer) = producer.and_then(|w| w.upgrade()) {
        producer.set_waiting_task(task);
    }
}

impl<T: 'static> Promise<T> {
    /// The promise's causality-graph vertex.
    #[must_use]
    pub fn vertex(&self) -> RuntimeVertex {
        self.shared.core.vertex()
    }

    pub(crate) fn core(&self) -> &Rc<PromiseCore> {
        &self.shared.core
    }

    /// Produces the value, scheduling the waiter if one is registered.
    ///
    /// Resolving a promise twice is a programming error.
    pub fn set_value(self, value: T) {
        let core = &self.shared.core;
        assert!(!core.resolved.get(), "promise resolved twice");
        core.resolved.set(true);
        *self.shared.slot.borrow_mut() = Slot::Ready(value);
        trace::trace_edge(&trace::current_traced_vertex(), &core.vertex(), false);
        let waiter = core.waiting_task.borrow_mut().take();
        if let Some(task) = waiter {
            resume(core, task);
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("core", &self.shared.core)
            .finish()
    }
}

impl<T> std::fmt::Debug for Eventual<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eventual")
            .field("core", &self.shared.core)
            .finish()
    }
}

fn take_ready<T>(shared: &Shared<T>) -> T {
    let mut slot = shared.slot.borrow_mut();
    match std::mem::replace(&mut *slot, Slot::Taken) {
        Slot::Ready(value) => value,
        Slot::Pending => panic!("continuation ran before its value arrived"),
        Slot::Taken => panic!("eventual value consumed twice"),
    }
}

impl<T: 'static> Eventual<T> {
    /// An already-resolved eventual.
    pub fn ready(value: T) -> Self {
        let (promise, eventual) = pair::<T>();
        promise.set_value(value);
        eventual
    }

    /// True once the value has been produced.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.core.is_resolved()
    }

    pub(crate) fn core(&self) -> &Rc<PromiseCore> {
        &self.shared.core
    }

    /// Takes the value out of a resolved eventual.
    ///
    /// Panics when the value has not arrived yet; used by the shard driver
    /// once the root eventual reports ready.
    #[must_use]
    pub fn take_now(self) -> T {
        take_ready(&self.shared)
    }

    /// Chains a continuation that runs when the value arrives.
    ///
    /// The continuation's task inherits the creating task's held-locks
    /// chain through a fresh lock level.
    #[track_caller]
    pub fn then<U: 'static, F>(self, f: F) -> Eventual<U>
    where
        F: FnOnce(T) -> Eventual<U> + 'static,
    {
        let location = Location::caller();
        let (p_out, e_out) = pair::<U>();
        let source = self.shared.clone();
        let child_held = current_task()
            .and_then(|t| t.held_locks())
            .map(|chain| new_lock_level(Some(&chain)));

        let task = Task::create(
            type_name::<F>(),
            location,
            child_held,
            Box::new(move || {
                let value = take_ready(&source);
                let inner = f(value);
                forward_into(inner, p_out, location);
            }),
        );
        e_out.shared.core.set_producer(&task);

        if self.shared.core.is_resolved() {
            resume(&self.shared.core, task);
        } else {
            register_waiter(&self.shared.core, &task);
        }
        e_out
    }

    /// Chains a synchronous transformation of the value.
    #[track_caller]
    pub fn map<U: 'static, F>(self, f: F) -> Eventual<U>
    where
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |value| Eventual::ready(f(value)))
    }

    /// Discards the value.
    #[track_caller]
    pub fn discard(self) -> Eventual<()> {
        self.map(|_| ())
    }
}

/// Settles `target` from `inner`: immediately when `inner` is ready,
/// otherwise through a forwarding task that keeps the wait visible to the
/// scanner (and carries the running task's held locks).
pub(crate) fn forward_into<T: 'static>(
    inner: Eventual<T>,
    target: Promise<T>,
    location: &'static Location<'static>,
) {
    if inner.is_ready() {
        target.set_value(inner.take_now());
        return;
    }
    let inner_core = inner.shared.core.clone();
    let inner_shared = inner.shared.clone();
    let held = current_task().and_then(|t| t.held_locks());
    let target_core = target.shared.core.clone();
    let task = Task::create(
        type_name::<Promise<T>>(),
        location,
        held,
        Box::new(move || {
            let value = take_ready(&inner_shared);
            target.set_value(value);
        }),
    );
    target_core.set_producer(&task);
    register_waiter(&inner_core, &task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Shard;

    #[test]
    fn ready_value_flows_through_then() {
        let result = Shard::run(|| Eventual::ready(20).then(|n| Eventual::ready(n + 22)));
        assert_eq!(result, 42);
    }

    #[test]
    fn pending_promise_resumes_waiter() {
        let result = Shard::run(|| {
            let (promise, eventual) = pair::<u32>();
            let chained = eventual.map(|n| n * 2);
            let _ = crate::runtime::spawn(move || {
                promise.set_value(21);
                Eventual::ready(())
            });
            chained
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn map_chains_compose() {
        let result = Shard::run(|| {
            Eventual::ready(1)
                .map(|n| n + 1)
                .map(|n| n * 10)
                .map(|n| n + 1)
        });
        assert_eq!(result, 21);
    }

    #[test]
    fn waiting_links_are_visible_to_introspection() {
        Shard::run(|| {
            let (promise, eventual) = pair::<()>();
            let core = promise.core().clone();
            let chained = eventual.then(|()| Eventual::ready(()));
            assert!(core.waiting_task().is_some());
            let waiter = core.waiting_task().expect("waiter");
            assert!(waiter.waiting_promise().is_some());
            let _ = crate::runtime::spawn(move || {
                promise.set_value(());
                Eventual::ready(())
            });
            chained
        });
    }
}
