//! Per-thread interning of static type-name strings.
//!
//! Concrete type tags are `&'static str` values (usually
//! `core::any::type_name` results) whose pointers are unique and stable for
//! the life of the process. The table maps pointer identity to a dense
//! 32-bit id; the first observation of a pointer emits a `STRING_ID` record
//! so each thread's dump is self-contained and decodable on its own.

use std::collections::HashMap;

/// A per-thread string-id table with dense, monotonically assigned ids.
#[derive(Debug, Default)]
pub struct StringTable {
    ids: HashMap<usize, u32>,
    next: u32,
}

impl StringTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text` by pointer identity.
    ///
    /// Returns the id and whether this is the first observation (in which
    /// case the caller must emit a `STRING_ID` record before any reference).
    pub fn intern(&mut self, text: &'static str) -> (u32, bool) {
        let key = text.as_ptr() as usize;
        if let Some(&id) = self.ids.get(&key) {
            return (id, false);
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(key, id);
        (id, true)
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forgets all assignments and restarts ids at 0.
    ///
    /// Called when a tracing session starts so every dump begins with a
    /// fresh, dense id space.
    pub fn reset(&mut self) {
        self.ids.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_from_zero() {
        let mut table = StringTable::new();
        let (a, new_a) = table.intern("alpha");
        let (b, new_b) = table.intern("beta");
        assert_eq!((a, new_a), (0, true));
        assert_eq!((b, new_b), (1, true));
    }

    #[test]
    fn repeated_pointer_reuses_id() {
        static NAME: &str = "some::type::Name";
        let mut table = StringTable::new();
        let (first, new_first) = table.intern(NAME);
        let (again, new_again) = table.intern(NAME);
        assert!(new_first);
        assert!(!new_again);
        assert_eq!(first, again);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reset_restarts_ids() {
        static NAME: &str = "zig";
        let mut table = StringTable::new();
        let _ = table.intern(NAME);
        table.reset();
        assert!(table.is_empty());
        let (id, new) = table.intern(NAME);
        assert_eq!((id, new), (0, true));
    }
}
