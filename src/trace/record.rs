//! Trace records and their newline-delimited JSON wire form.
//!
//! Each record is one tagged event in a thread's stream. The closed
//! [`RecordKind`] set mirrors the event taxonomy of the dump format; records
//! are serialized one JSON object per line, in declared field order, with
//! absent optional fields skipped and the null vertex serialized as a JSON
//! `null`.

use super::vertex::{RuntimeVertex, VertexKind};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// The kind of a trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// First observation of an interned string on this thread.
    StringId,
    /// A happens-before edge `pre -> vertex`.
    Edge,
    /// A vertex came into existence.
    VertexCtor,
    /// A vertex was destroyed.
    VertexDtor,
    /// A vertex was logically relocated.
    VertexMove,
    /// A semaphore was constructed.
    SemCtor,
    /// A semaphore was destroyed.
    SemDtor,
    /// A semaphore was logically relocated.
    SemMove,
    /// Units were returned to a semaphore.
    SemSignal,
    /// A wait was issued against a semaphore.
    SemWait,
    /// A previously issued wait was granted.
    SemWaitCmpl,
    /// A function type tag was attached to a vertex.
    FuncType,
}

impl RecordKind {
    /// Canonical list of all record kinds.
    pub const ALL: [Self; 12] = [
        Self::StringId,
        Self::Edge,
        Self::VertexCtor,
        Self::VertexDtor,
        Self::VertexMove,
        Self::SemCtor,
        Self::SemDtor,
        Self::SemMove,
        Self::SemSignal,
        Self::SemWait,
        Self::SemWaitCmpl,
        Self::FuncType,
    ];

    /// The stable tag written to the dump.
    #[must_use]
    pub const fn stable_name(self) -> &'static str {
        match self {
            Self::StringId => "STRING_ID",
            Self::Edge => "EDGE",
            Self::VertexCtor => "VERTEX_CTOR",
            Self::VertexDtor => "VERTEX_DTOR",
            Self::VertexMove => "VERTEX_MOVE",
            Self::SemCtor => "SEM_CTOR",
            Self::SemDtor => "SEM_DTOR",
            Self::SemMove => "SEM_MOVE",
            Self::SemSignal => "SEM_SIGNAL",
            Self::SemWait => "SEM_WAIT",
            Self::SemWaitCmpl => "SEM_WAIT_CMPL",
            Self::FuncType => "FUNC_TYPE",
        }
    }

    /// Parses a stable tag back into a kind.
    #[must_use]
    pub fn from_stable_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.stable_name() == name)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stable_name())
    }
}

/// The `value` field of a record: semaphore units or the speculative flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// An unsigned count (semaphore units, string id).
    Units(u64),
    /// A boolean flag (speculative edges).
    Flag(bool),
}

/// A typed trace record, as built by the hooks before encoding.
///
/// The timestamp is stamped by the encoder, not the hook; concrete type
/// names ride along as `&'static str` and are interned at encode time.
#[derive(Debug, Clone, Default)]
pub struct TraceRecord {
    /// The record kind; `None` only for `Default`, which is invalid to emit.
    pub kind: Option<RecordKind>,
    /// The primary vertex (`post` for edges).
    pub vertex: Option<RuntimeVertex>,
    /// The predecessor vertex.
    pub pre: Option<RuntimeVertex>,
    /// Semaphore address.
    pub sem: Option<usize>,
    /// Units, speculative flag, or string id.
    pub value: Option<RecordValue>,
    /// Short free-form payload.
    pub extra: Option<String>,
    /// A name to intern; its id lands in `value`.
    pub func_type: Option<&'static str>,
}

impl TraceRecord {
    /// Creates an empty record of the given kind.
    #[must_use]
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Sets the primary vertex.
    #[must_use]
    pub fn vertex(mut self, v: RuntimeVertex) -> Self {
        self.vertex = Some(v);
        self
    }

    /// Sets the predecessor vertex.
    #[must_use]
    pub fn pre(mut self, v: RuntimeVertex) -> Self {
        self.pre = Some(v);
        self
    }

    /// Sets the semaphore address.
    #[must_use]
    pub fn sem(mut self, sem: usize) -> Self {
        self.sem = Some(sem);
        self
    }

    /// Sets the unsigned value.
    #[must_use]
    pub fn units(mut self, units: u64) -> Self {
        self.value = Some(RecordValue::Units(units));
        self
    }

    /// Sets the boolean value.
    #[must_use]
    pub fn flag(mut self, flag: bool) -> Self {
        self.value = Some(RecordValue::Flag(flag));
        self
    }

    /// Sets the free-form payload.
    #[must_use]
    pub fn extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// A vertex as it appears on the wire.
///
/// The null vertex serializes as a JSON `null` rather than an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireVertex {
    /// Entity address.
    pub address: u64,
    /// Base kind.
    pub kind: VertexKind,
    /// Interned concrete-type id, when one was attached.
    pub type_id: Option<u32>,
}

impl WireVertex {
    /// Encodes a runtime vertex, with its concrete type already interned.
    #[must_use]
    pub fn from_vertex(v: &RuntimeVertex, type_id: Option<u32>) -> Self {
        Self {
            address: v.get_ptr() as u64,
            kind: v.kind(),
            type_id,
        }
    }

}

impl Serialize for WireVertex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.kind == VertexKind::Null && self.address == 0 {
            return serializer.serialize_none();
        }
        let fields = 2 + usize::from(self.type_id.is_some());
        let mut s = serializer.serialize_struct("vertex", fields)?;
        s.serialize_field("address", &self.address)?;
        s.serialize_field("kind", self.kind.stable_name())?;
        if let Some(id) = self.type_id {
            s.serialize_field("type_id", &id)?;
        }
        s.end()
    }
}

/// One fully encoded record, ready for `serde_json` line serialization.
#[derive(Debug, Clone, Serialize)]
pub struct WireRecord<'a> {
    /// Record tag.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Primary vertex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex: Option<WireVertex>,
    /// Predecessor vertex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<WireVertex>,
    /// Semaphore address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sem: Option<u64>,
    /// Units / flag / string id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RecordValue>,
    /// Free-form payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<&'a str>,
    /// Monotonic nanoseconds since process start.
    pub timestamp: u64,
}
