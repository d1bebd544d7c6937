//! The per-thread current-vertex register.
//!
//! Each OS thread carries one slot naming the vertex that is logically
//! executing right now: a task during its body, a promise during completion,
//! the null vertex otherwise. The slot is updated through a scoped guard
//! whose destructor enforces LIFO nesting: a continuation that resumes on a
//! thread and fails to restore the caller's vertex before returning is a
//! host-integration bug and aborts.
//!
//! The register is strictly thread-local; no synchronisation is involved.

use super::vertex::RuntimeVertex;
use std::cell::RefCell;

thread_local! {
    static CURRENT_VERTEX: RefCell<RuntimeVertex> = RefCell::new(RuntimeVertex::null());
}

/// Returns the vertex logically executing on this thread right now.
///
/// Never "unset": between tasks the slot holds the null vertex.
#[must_use]
pub fn current_traced_vertex() -> RuntimeVertex {
    if !crate::trace::hooks::ENABLED {
        return RuntimeVertex::null();
    }
    CURRENT_VERTEX.with(|slot| slot.borrow().clone())
}

/// Scoped updater for the current-vertex register.
///
/// Construction installs a new vertex and remembers the previous one; drop
/// asserts the slot still holds the installed vertex, then restores the
/// previous value.
#[derive(Debug)]
pub struct CurrentVertexGuard {
    installed: RuntimeVertex,
    previous: RuntimeVertex,
}

impl CurrentVertexGuard {
    /// Installs `vertex` as the current vertex for the scope of the guard.
    #[must_use]
    pub fn enter(vertex: RuntimeVertex) -> Self {
        if !crate::trace::hooks::ENABLED {
            return Self {
                installed: RuntimeVertex::null(),
                previous: RuntimeVertex::null(),
            };
        }
        let previous =
            CURRENT_VERTEX.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), vertex.clone()));
        Self {
            installed: vertex,
            previous,
        }
    }
}

impl Drop for CurrentVertexGuard {
    fn drop(&mut self) {
        if !crate::trace::hooks::ENABLED {
            return;
        }
        CURRENT_VERTEX.with(|slot| {
            let mut slot = slot.borrow_mut();
            assert!(
                *slot == self.installed,
                "current-vertex register left in a non-LIFO state: expected {}, found {}",
                self.installed,
                slot
            );
            *slot = std::mem::take(&mut self.previous);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::vertex::VertexKind;

    #[test]
    fn slot_starts_null() {
        assert!(current_traced_vertex().is_null());
    }

    #[test]
    fn guard_installs_and_restores() {
        let outer = RuntimeVertex::task(0x10, None);
        let inner = RuntimeVertex::promise(0x20, None);
        {
            let _g1 = CurrentVertexGuard::enter(outer.clone());
            assert_eq!(current_traced_vertex(), outer);
            {
                let _g2 = CurrentVertexGuard::enter(inner.clone());
                assert_eq!(current_traced_vertex(), inner);
                assert_eq!(current_traced_vertex().kind(), VertexKind::Promise);
            }
            assert_eq!(current_traced_vertex(), outer);
        }
        assert!(current_traced_vertex().is_null());
    }

    #[test]
    fn nested_guards_restore_in_lifo_order() {
        let a = RuntimeVertex::task(1, None);
        let b = RuntimeVertex::task(2, None);
        let c = RuntimeVertex::task(3, None);
        let g1 = CurrentVertexGuard::enter(a.clone());
        let g2 = CurrentVertexGuard::enter(b);
        let g3 = CurrentVertexGuard::enter(c);
        drop(g3);
        drop(g2);
        assert_eq!(current_traced_vertex(), a);
        drop(g1);
        assert!(current_traced_vertex().is_null());
    }
}
