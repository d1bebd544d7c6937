//! Mutex activity index and the inactive-mutex scanner.
//!
//! Every mutex operation stamps the activity index. A user-driven task
//! periodically asks for the mutexes that have been idle longer than
//! [`MAX_INACTIVE_PERIOD`] while closed; each such candidate seeds a DFS
//! over the heterogeneous wait graph of mutexes, promises, tasks, and
//! held-locks chains, looking for a cycle. A finding is logged through the
//! deadlock sink and returned to the caller; scanning then continues with
//! the next candidate.

use crate::runtime::promise::PromiseCore;
use crate::runtime::task::Task;
use crate::sync::held_locks::HeldLocks;
use crate::sync::mutex::MutexInner;
use crate::trace::hooks::ENABLED;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// How long a closed mutex may sit untouched before it becomes a scan
/// candidate.
pub const MAX_INACTIVE_PERIOD: Duration = Duration::from_secs(3);

/// The kind of a node in the scanner's wait graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A mutex.
    Mutex,
    /// A promise (suspension point).
    Promise,
    /// A task.
    Task,
    /// A held-locks chain node.
    HeldLocks,
}

impl NodeKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Promise => "promise",
            Self::Task => "task",
            Self::HeldLocks => "held_locks",
        }
    }
}

type NodeId = (NodeKind, usize);

/// One confirmed cycle among long-idle mutexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    /// The candidate mutex the search started from.
    pub mutex: usize,
    /// The node whose revisit closed the cycle.
    pub initiator_kind: NodeKind,
    /// Address of the initiator node.
    pub initiator: usize,
}

impl std::fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deadlock via mutex {:#x} (cycle closed at {} {:#x})",
            self.mutex,
            self.initiator_kind.name(),
            self.initiator
        )
    }
}

struct ActivityEntry {
    at: Instant,
    mutex: Weak<MutexInner>,
}

#[derive(Default)]
struct MutexActivity {
    by_time: BTreeSet<(Instant, usize)>,
    last_activity: HashMap<usize, ActivityEntry>,
}

thread_local! {
    static ACTIVITY: RefCell<MutexActivity> = RefCell::new(MutexActivity::default());
}

/// Stamps `mutex` as active now, replacing any previous entry.
pub(crate) fn register_activity(mutex: &Rc<MutexInner>) {
    if !ENABLED {
        return;
    }
    let addr = Rc::as_ptr(mutex) as usize;
    ACTIVITY.with(|activity| {
        let mut activity = activity.borrow_mut();
        if let Some(prior) = activity.last_activity.remove(&addr) {
            activity.by_time.remove(&(prior.at, addr));
        }
        let now = Instant::now();
        activity.by_time.insert((now, addr));
        activity.last_activity.insert(
            addr,
            ActivityEntry {
                at: now,
                mutex: Rc::downgrade(mutex),
            },
        );
    });
}

/// Forgets the mutex at `addr`.
///
/// Runs from `Drop`, so it must survive thread teardown.
pub(crate) fn delete_mutex(addr: usize) {
    if !ENABLED {
        return;
    }
    let _ = ACTIVITY.try_with(|activity| {
        let mut activity = activity.borrow_mut();
        match activity.last_activity.remove(&addr) {
            Some(entry) => {
                activity.by_time.remove(&(entry.at, addr));
            }
            None => tracing::warn!(
                target: "causetrace::deadlock",
                mutex = %format_args!("{addr:#x}"),
                "mutex_activity: deleting non-existent mutex"
            ),
        }
    });
}

/// Number of mutexes currently tracked on this shard.
#[must_use]
pub fn tracked_mutex_count() -> usize {
    ACTIVITY.with(|activity| activity.borrow().last_activity.len())
}

/// The cycle signal unwinding out of the DFS.
///
/// `Unwinding` travels back toward the node that was revisited; once that
/// frame is reached the finding is complete and propagates as `Complete`.
enum CycleSignal {
    Unwinding(NodeId),
    Complete(NodeId),
}

type Step = Result<(), CycleSignal>;

struct SearchCtx {
    route: HashSet<NodeId>,
    visited: HashSet<NodeId>,
}

impl SearchCtx {
    /// Route/visited bookkeeping shared by all four node kinds. Returns
    /// `Ok(false)` when the node was already fully explored.
    fn enter(&mut self, id: NodeId) -> Result<bool, CycleSignal> {
        if self.route.contains(&id) {
            tracing::warn!(target: "causetrace::deadlock", "DEADLOCK");
            return Err(CycleSignal::Unwinding(id));
        }
        if self.visited.contains(&id) {
            return Ok(false);
        }
        self.route.insert(id);
        self.visited.insert(id);
        Ok(true)
    }

    fn leave(&mut self, id: NodeId) {
        self.route.remove(&id);
    }
}

fn unwind(id: NodeId, signal: CycleSignal) -> CycleSignal {
    match signal {
        CycleSignal::Unwinding(initiator) => {
            tracing::warn!(
                target: "causetrace::deadlock",
                node = id.0.name(),
                address = %format_args!("{:#x}", id.1),
                "deadlocked node on cycle"
            );
            if initiator == id {
                CycleSignal::Complete(initiator)
            } else {
                CycleSignal::Unwinding(initiator)
            }
        }
        complete @ CycleSignal::Complete(_) => complete,
    }
}

fn search_mutex(mutex: &Rc<MutexInner>, cx: &mut SearchCtx) -> Step {
    let id = (NodeKind::Mutex, Rc::as_ptr(mutex) as usize);
    if !cx.enter(id)? {
        return Ok(());
    }
    let result = (|| {
        for core in mutex.waiting_promises() {
            search_promise(&core, cx)?;
        }
        Ok(())
    })();
    cx.leave(id);
    result.map_err(|signal| unwind(id, signal))
}

fn search_promise(core: &Rc<PromiseCore>, cx: &mut SearchCtx) -> Step {
    let id = (NodeKind::Promise, core.address());
    if !cx.enter(id)? {
        return Ok(());
    }
    let result = (|| {
        if let Some(chain) = core.held_locks() {
            search_locks(&chain, cx)?;
        }
        if let Some(task) = core.waiting_task() {
            search_task(&task, cx)?;
        }
        Ok(())
    })();
    cx.leave(id);
    result.map_err(|signal| unwind(id, signal))
}

fn search_task(task: &Rc<Task>, cx: &mut SearchCtx) -> Step {
    let id = (NodeKind::Task, Rc::as_ptr(task) as usize);
    if !cx.enter(id)? {
        return Ok(());
    }
    let result = (|| {
        if let Some(chain) = task.held_locks() {
            search_locks(&chain, cx)?;
        }
        if let Some(core) = task.waiting_promise() {
            search_promise(&core, cx)?;
        }
        if let Some(next) = task.waiting_task() {
            search_task(&next, cx)?;
        }
        Ok(())
    })();
    cx.leave(id);
    result.map_err(|signal| unwind(id, signal))
}

fn search_locks(chain: &HeldLocks, cx: &mut SearchCtx) -> Step {
    let id = (NodeKind::HeldLocks, chain.address());
    if !cx.enter(id)? {
        return Ok(());
    }
    let result = (|| {
        for mutex in chain.owned_mutexes() {
            search_mutex(&mutex, cx)?;
        }
        if let Some(parent) = chain.parent() {
            search_locks(&parent, cx)?;
        }
        Ok(())
    })();
    cx.leave(id);
    result.map_err(|signal| unwind(id, signal))
}

/// Scans for cycles among mutexes idle longer than [`MAX_INACTIVE_PERIOD`],
/// evaluated against the wall clock.
#[must_use]
pub fn find_inactive_mutexes() -> Vec<DeadlockReport> {
    find_inactive_mutexes_at(Instant::now())
}

/// Scans as of the explicit instant `now`.
///
/// Taking the clock as a parameter lets tests drive the inactivity window
/// without sleeping through it.
#[must_use]
pub fn find_inactive_mutexes_at(now: Instant) -> Vec<DeadlockReport> {
    if !ENABLED {
        return Vec::new();
    }
    let candidates: Vec<(Instant, usize)> = ACTIVITY.with(|activity| {
        activity.borrow().by_time.iter().copied().collect()
    });

    let mut reports = Vec::new();
    let mut visited = HashSet::new();
    for (stamp, addr) in candidates {
        if now.saturating_duration_since(stamp) < MAX_INACTIVE_PERIOD {
            break;
        }
        let Some(mutex) = ACTIVITY.with(|activity| {
            activity
                .borrow()
                .last_activity
                .get(&addr)
                .and_then(|entry| entry.mutex.upgrade())
        }) else {
            continue;
        };
        if mutex.is_open() {
            continue;
        }

        let mut cx = SearchCtx {
            route: HashSet::new(),
            visited: std::mem::take(&mut visited),
        };
        match search_mutex(&mutex, &mut cx) {
            Ok(()) => {}
            Err(CycleSignal::Complete((kind, initiator))) => {
                let report = DeadlockReport {
                    mutex: addr,
                    initiator_kind: kind,
                    initiator,
                };
                tracing::warn!(target: "causetrace::deadlock", %report, "deadlock found");
                reports.push(report);
            }
            Err(CycleSignal::Unwinding(_)) => {
                debug_assert!(false, "cycle signal escaped without completing");
            }
        }
        visited = cx.visited;
    }
    reports
}
