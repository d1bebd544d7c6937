//! Runtime vertices: type-erased handles to tasks, promises, and futures.
//!
//! A vertex identifies one entity of the host runtime by its address and
//! base kind. Vertices are values: copied freely, never owning the pointee,
//! and never dereferenced by tracer code; the pointee's lifetime belongs to
//! the runtime.

use std::fmt;
use std::rc::Rc;

/// The base kind of a runtime vertex.
///
/// The set is closed and stable; new entity kinds do not appear at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexKind {
    /// A scheduled unit of work.
    Task,
    /// The producing half of a suspension point.
    Promise,
    /// The consuming half of a suspension point.
    Future,
    /// The null placeholder (address 0).
    Null,
}

impl VertexKind {
    /// Stable, grep-friendly name used in the on-disk encoding.
    #[must_use]
    pub const fn stable_name(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Promise => "promise",
            Self::Future => "future",
            Self::Null => "null",
        }
    }

    /// Parses a stable name back into a kind.
    #[must_use]
    pub fn from_stable_name(name: &str) -> Option<Self> {
        match name {
            "task" => Some(Self::Task),
            "promise" => Some(Self::Promise),
            "future" => Some(Self::Future),
            "null" => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stable_name())
    }
}

/// A type-erased handle to one runtime entity.
///
/// Two vertices are equal iff their `address` and `kind` are equal; the
/// concrete type tag is informational only and may change as an address is
/// reused for a new entity.
#[derive(Debug, Clone)]
pub struct RuntimeVertex {
    address: usize,
    kind: VertexKind,
    concrete_type: Option<&'static str>,
    extra: Option<Rc<str>>,
}

impl RuntimeVertex {
    /// The null vertex: address 0, kind [`VertexKind::Null`].
    #[must_use]
    pub const fn null() -> Self {
        Self {
            address: 0,
            kind: VertexKind::Null,
            concrete_type: None,
            extra: None,
        }
    }

    /// A task vertex at `address`, optionally tagged with the continuation's
    /// callable type.
    #[must_use]
    pub const fn task(address: usize, concrete_type: Option<&'static str>) -> Self {
        Self {
            address,
            kind: VertexKind::Task,
            concrete_type,
            extra: None,
        }
    }

    /// A promise vertex at `address`, optionally tagged with the value type.
    #[must_use]
    pub const fn promise(address: usize, concrete_type: Option<&'static str>) -> Self {
        Self {
            address,
            kind: VertexKind::Promise,
            concrete_type,
            extra: None,
        }
    }

    /// A bare address with no kind information (used when only the address
    /// of a moved-from slot is known).
    #[must_use]
    pub const fn bare(address: usize) -> Self {
        Self {
            address,
            kind: VertexKind::Null,
            concrete_type: None,
            extra: None,
        }
    }

    /// A future vertex at `address`.
    #[must_use]
    pub const fn future(address: usize) -> Self {
        Self {
            address,
            kind: VertexKind::Future,
            concrete_type: None,
            extra: None,
        }
    }

    /// Attaches a short JSON fragment of debug metadata.
    #[must_use]
    pub fn with_extra(mut self, extra: impl Into<Rc<str>>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// The machine-word address identifying the underlying entity.
    #[must_use]
    pub const fn get_ptr(&self) -> usize {
        self.address
    }

    /// The base kind of the entity.
    #[must_use]
    pub const fn kind(&self) -> VertexKind {
        self.kind
    }

    /// The optional concrete type tag (display only).
    #[must_use]
    pub const fn concrete_type(&self) -> Option<&'static str> {
        self.concrete_type
    }

    /// The optional debug metadata attached at creation.
    #[must_use]
    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    /// True for the null vertex.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self.kind, VertexKind::Null)
    }
}

impl PartialEq for RuntimeVertex {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.kind == other.kind
    }
}

impl Eq for RuntimeVertex {}

impl Default for RuntimeVertex {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for RuntimeVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.kind, self.address)?;
        if let Some(ty) = self.concrete_type {
            write!(f, " [{ty}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_concrete_type() {
        let a = RuntimeVertex::task(0x1000, Some("foo"));
        let b = RuntimeVertex::task(0x1000, Some("bar"));
        assert_eq!(a, b);
    }

    #[test]
    fn equality_distinguishes_kinds() {
        let a = RuntimeVertex::task(0x1000, None);
        let b = RuntimeVertex::promise(0x1000, None);
        assert_ne!(a, b);
    }

    #[test]
    fn null_vertex_has_zero_address() {
        let v = RuntimeVertex::null();
        assert_eq!(v.get_ptr(), 0);
        assert!(v.is_null());
        assert_eq!(v, RuntimeVertex::default());
    }

    #[test]
    fn stable_names_round_trip() {
        for kind in [
            VertexKind::Task,
            VertexKind::Promise,
            VertexKind::Future,
            VertexKind::Null,
        ] {
            assert_eq!(VertexKind::from_stable_name(kind.stable_name()), Some(kind));
        }
    }
}
