//! The single-threaded cooperative shard executor.
//!
//! One executor per OS thread: a FIFO run queue of continuation tasks plus a
//! timer heap for [`sleep`]. [`Shard::run`] drives both until the root
//! eventual resolves. Around every task body the executor installs the
//! runtime's current-task slot and the tracer's current-vertex guard, so
//! completion events are attributed to the task that caused them.

use crate::runtime::promise::{pair, Eventual};
use crate::runtime::task::{self, previous_tasks, Task};
use crate::trace::{self, CurrentVertexGuard};
use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, VecDeque};
use std::panic::Location;
use std::rc::Rc;
use std::time::{Duration, Instant};

thread_local! {
    static RUN_QUEUE: RefCell<VecDeque<Rc<Task>>> = RefCell::new(VecDeque::new());
    static TIMERS: RefCell<BinaryHeap<TimerEntry>> = RefCell::new(BinaryHeap::new());
    static TIMER_SEQ: Cell<u64> = const { Cell::new(0) };
    static RUNNING: Cell<bool> = const { Cell::new(false) };
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    promise: crate::runtime::promise::Promise<()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the binary heap pops the earliest deadline first.
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

/// Pushes a task onto this shard's run queue.
///
/// A task scheduled with no known causal predecessor gets speculative
/// edges from every task the list scan identifies as upstream.
pub(crate) fn schedule(task: Rc<Task>) {
    if task.waiting_promise().is_none() {
        for candidate in previous_tasks(&task) {
            trace::trace_edge(&candidate.vertex(), &task.vertex(), true);
        }
    }
    RUN_QUEUE.with(|queue| queue.borrow_mut().push_back(task));
}

fn run_one() -> bool {
    let next = RUN_QUEUE.with(|queue| queue.borrow_mut().pop_front());
    let Some(current) = next else {
        return false;
    };
    task::set_current_task(Some(current.clone()));
    let guard = CurrentVertexGuard::enter(current.vertex());
    if let Some(thunk) = current.take_thunk() {
        thunk();
    } else {
        debug_assert!(false, "task scheduled twice");
    }
    drop(guard);
    task::set_current_task(None);
    true
}

/// Fires every timer whose deadline has passed, returning the next
/// pending deadline if one remains.
fn fire_due_timers(now: Instant) -> Option<Instant> {
    loop {
        let due = TIMERS.with(|timers| {
            let mut timers = timers.borrow_mut();
            if timers.peek().is_some_and(|entry| entry.deadline <= now) {
                timers.pop()
            } else {
                None
            }
        });
        match due {
            Some(entry) => entry.promise.set_value(()),
            None => return TIMERS.with(|timers| timers.borrow().peek().map(|e| e.deadline)),
        }
    }
}

/// The shard entry point.
#[derive(Debug)]
pub struct Shard;

impl Shard {
    /// Drives this thread's run queue and timers until the eventual
    /// returned by `root` resolves, then returns its value.
    ///
    /// Tasks still pending when the root resolves are dropped with the
    /// shard's queues.
    pub fn run<T: 'static>(root: impl FnOnce() -> Eventual<T>) -> T {
        RUNNING.with(|running| {
            assert!(!running.get(), "Shard::run is not reentrant");
            running.set(true);
        });
        let result = Self::drive(root());
        // Abandoned work (a deadlocked chain, pending timers) is released
        // here, while every thread-local it touches on drop is still alive.
        RUN_QUEUE.with(|queue| queue.borrow_mut().clear());
        TIMERS.with(|timers| timers.borrow_mut().clear());
        RUNNING.with(|running| running.set(false));
        result
    }

    fn drive<T: 'static>(root: Eventual<T>) -> T {
        loop {
            while run_one() {}
            if root.is_ready() {
                return root.take_now();
            }
            let next_deadline = fire_due_timers(Instant::now());
            let queued = RUN_QUEUE.with(|queue| !queue.borrow().is_empty());
            if queued {
                continue;
            }
            let Some(deadline) = next_deadline else {
                panic!("shard stalled: root eventual cannot make progress");
            };
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
    }
}

/// Spawns `f` as a detached root task on this shard.
///
/// The returned eventual resolves when the task's chain completes.
#[track_caller]
pub fn spawn<T, F>(f: F) -> Eventual<T>
where
    T: 'static,
    F: FnOnce() -> Eventual<T> + 'static,
{
    let location = Location::caller();
    let (p_out, e_out) = pair::<T>();
    let core = e_out.core().clone();
    let task = Task::create(
        std::any::type_name::<F>(),
        location,
        None,
        Box::new(move || {
            crate::runtime::promise::forward_into(f(), p_out, location);
        }),
    );
    core.set_producer(&task);
    schedule(task);
    e_out
}

/// Suspends for `duration`, resolving on this shard's timer.
#[must_use]
pub fn sleep(duration: Duration) -> Eventual<()> {
    let (promise, eventual) = pair::<()>();
    let seq = TIMER_SEQ.with(|seq| {
        let next = seq.get();
        seq.set(next + 1);
        next
    });
    TIMERS.with(|timers| {
        timers.borrow_mut().push(TimerEntry {
            deadline: Instant::now() + duration,
            seq,
            promise,
        });
    });
    eventual
}
