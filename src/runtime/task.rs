//! Task control blocks and the per-shard task list.
//!
//! A task is one schedulable continuation. Its address identifies the task
//! vertex in the causality graph; the control block additionally exposes the
//! introspection surface the deadlock scanner walks: the downstream
//! continuation (`waiting_task`), the promise the task is blocked on
//! (`waiting_promise`), and the held-locks chain.
//!
//! Every live task is registered in a thread-local list, keyed by address;
//! registration happens at construction and removal in `Drop`, mirroring the
//! entity lifecycle events in the trace stream.

use crate::runtime::promise::PromiseCore;
use crate::sync::HeldLocks;
use crate::trace::{self, RuntimeVertex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::Location;
use std::rc::{Rc, Weak};

thread_local! {
    static TASK_LIST: RefCell<HashMap<usize, Weak<Task>>> = RefCell::new(HashMap::new());
    static CURRENT_TASK: RefCell<Option<Rc<Task>>> = const { RefCell::new(None) };
}

/// A schedulable continuation with scanner-visible wait edges.
pub struct Task {
    thunk: RefCell<Option<Box<dyn FnOnce()>>>,
    waiting_task: RefCell<Option<Weak<Task>>>,
    waiting_promise: RefCell<Option<Weak<PromiseCore>>>,
    held: RefCell<Option<HeldLocks>>,
    func_type: &'static str,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("func_type", &self.func_type)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Creates and registers a task, emitting its creation events.
    ///
    /// The creation edge runs from whatever vertex is current on this
    /// thread to the new task.
    pub(crate) fn create(
        func_type: &'static str,
        location: &'static Location<'static>,
        held: Option<HeldLocks>,
        thunk: Box<dyn FnOnce()>,
    ) -> Rc<Self> {
        let task = Rc::new(Self {
            thunk: RefCell::new(Some(thunk)),
            waiting_task: RefCell::new(None),
            waiting_promise: RefCell::new(None),
            held: RefCell::new(held),
            func_type,
        });
        TASK_LIST.with(|list| {
            list.borrow_mut()
                .insert(Rc::as_ptr(&task) as usize, Rc::downgrade(&task));
        });
        let vertex = task.vertex();
        trace::trace_vertex_constructor(&vertex);
        trace::trace_edge(&trace::current_traced_vertex(), &vertex, false);
        trace::attach_func_type(&vertex, func_type, location.file(), location.line());
        task
    }

    /// The task's address identity.
    #[must_use]
    pub fn address(&self) -> usize {
        std::ptr::addr_of!(*self) as usize
    }

    /// The task's causality-graph vertex.
    #[must_use]
    pub fn vertex(&self) -> RuntimeVertex {
        RuntimeVertex::task(self.address(), Some(self.func_type))
    }

    /// The downstream continuation waiting for this task, if any.
    #[must_use]
    pub fn waiting_task(&self) -> Option<Rc<Task>> {
        self.waiting_task.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_waiting_task(&self, task: &Rc<Task>) {
        *self.waiting_task.borrow_mut() = Some(Rc::downgrade(task));
    }

    /// The promise this task is blocked on, if any.
    #[must_use]
    pub fn waiting_promise(&self) -> Option<Rc<PromiseCore>> {
        self.waiting_promise
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_waiting_promise(&self, core: &Rc<PromiseCore>) {
        *self.waiting_promise.borrow_mut() = Some(Rc::downgrade(core));
    }

    pub(crate) fn clear_waiting_promise(&self) {
        *self.waiting_promise.borrow_mut() = None;
    }

    /// The task's current held-locks chain.
    #[must_use]
    pub fn held_locks(&self) -> Option<HeldLocks> {
        self.held.borrow().clone()
    }

    /// Replaces the task's held-locks chain.
    pub fn set_held_locks(&self, held: Option<HeldLocks>) {
        *self.held.borrow_mut() = held;
    }

    pub(crate) fn take_thunk(&self) -> Option<Box<dyn FnOnce()>> {
        self.thunk.borrow_mut().take()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Tasks queued at thread exit drop while thread-locals tear down.
        let _ = TASK_LIST.try_with(|list| {
            list.borrow_mut().remove(&self.address());
        });
        trace::trace_vertex_destructor(&self.vertex());
    }
}

/// The task currently executing on this shard, if any.
#[must_use]
pub fn current_task() -> Option<Rc<Task>> {
    CURRENT_TASK.with(|slot| slot.borrow().clone())
}

pub(crate) fn set_current_task(task: Option<Rc<Task>>) {
    CURRENT_TASK.with(|slot| *slot.borrow_mut() = task);
}

/// Number of live tasks registered on this shard.
#[must_use]
pub fn task_count() -> usize {
    TASK_LIST.with(|list| list.borrow().len())
}

/// Scans the shard task list for tasks whose `waiting_task` is `task`.
///
/// These are the upstream producers `task` is waiting on. More than one
/// candidate is possible; callers must not silently drop duplicates: the
/// tracer emits a speculative edge for every one.
#[must_use]
pub fn previous_tasks(task: &Rc<Task>) -> Vec<Rc<Task>> {
    let target = Rc::as_ptr(task) as usize;
    TASK_LIST.with(|list| {
        list.borrow()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|candidate| {
                candidate
                    .waiting_task()
                    .is_some_and(|w| Rc::as_ptr(&w) as usize == target)
            })
            .collect()
    })
}
