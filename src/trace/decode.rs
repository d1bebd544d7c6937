//! Decoder for the newline-delimited JSON dump format.
//!
//! Reads a per-thread dump back into records, resolves the string-id table,
//! and expands `VERTEX_MOVE` records into their semantic four-event form.
//! This is the same decoder the offline graph tool builds on; in-tree it
//! backs the format's testable properties (exact truncation, dense string
//! ids, lifecycle ordering).
//!
//! Only the NDJSON encoding is understood. The dump carries no magic, so a
//! file that fails to parse line-by-line is not a causetrace dump.

use crate::trace::record::RecordKind;
use crate::trace::vertex::VertexKind;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Errors raised while decoding a dump.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The file could not be read.
    #[error("failed to read dump: {0}")]
    Io(#[from] std::io::Error),
    /// A line was not valid JSON (trailing padding shows up here).
    #[error("line {line}: invalid JSON: {source}")]
    Json {
        /// 1-based line number.
        line: usize,
        /// Parser error.
        source: serde_json::Error,
    },
    /// A line parsed but did not look like a record.
    #[error("line {line}: malformed record: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
}

/// A vertex as decoded from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedVertex {
    /// Entity address.
    pub address: u64,
    /// Base kind.
    pub kind: VertexKind,
    /// Interned concrete-type id, when present.
    pub type_id: Option<u32>,
}

impl DecodedVertex {
    /// The JSON-`null` vertex.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            address: 0,
            kind: VertexKind::Null,
            type_id: None,
        }
    }
}

/// The decoded `value` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedValue {
    /// An unsigned count.
    Units(u64),
    /// A boolean flag.
    Flag(bool),
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Record kind.
    pub kind: RecordKind,
    /// Primary vertex, when present.
    pub vertex: Option<DecodedVertex>,
    /// Predecessor vertex, when present.
    pub pre: Option<DecodedVertex>,
    /// Semaphore address, when present.
    pub sem: Option<u64>,
    /// Units or flag, when present.
    pub value: Option<DecodedValue>,
    /// Free-form payload, when present.
    pub extra: Option<String>,
    /// Monotonic timestamp.
    pub timestamp: u64,
    /// Bytes this record occupied on disk, newline included.
    pub byte_len: usize,
}

fn decode_vertex(value: &Value, line: usize) -> Result<DecodedVertex, DecodeError> {
    if value.is_null() {
        return Ok(DecodedVertex::null());
    }
    let object = value.as_object().ok_or_else(|| DecodeError::Malformed {
        line,
        reason: "vertex is neither null nor an object".into(),
    })?;
    let address = object
        .get("address")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::Malformed {
            line,
            reason: "vertex missing address".into(),
        })?;
    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .and_then(VertexKind::from_stable_name)
        .ok_or_else(|| DecodeError::Malformed {
            line,
            reason: "vertex missing kind".into(),
        })?;
    let type_id = object
        .get("type_id")
        .and_then(Value::as_u64)
        .map(|id| id as u32);
    Ok(DecodedVertex {
        address,
        kind,
        type_id,
    })
}

fn decode_line(raw: &str, line: usize) -> Result<DecodedRecord, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|source| DecodeError::Json { line, source })?;
    let object = value.as_object().ok_or_else(|| DecodeError::Malformed {
        line,
        reason: "record is not an object".into(),
    })?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(RecordKind::from_stable_name)
        .ok_or_else(|| DecodeError::Malformed {
            line,
            reason: "unknown record type".into(),
        })?;
    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::Malformed {
            line,
            reason: "missing timestamp".into(),
        })?;
    let vertex = object
        .get("vertex")
        .map(|v| decode_vertex(v, line))
        .transpose()?;
    let pre = object.get("pre").map(|v| decode_vertex(v, line)).transpose()?;
    let sem = object.get("sem").and_then(Value::as_u64);
    let decoded_value = match object.get("value") {
        None => None,
        Some(Value::Bool(flag)) => Some(DecodedValue::Flag(*flag)),
        Some(v) => Some(DecodedValue::Units(v.as_u64().ok_or_else(|| {
            DecodeError::Malformed {
                line,
                reason: "value is neither boolean nor unsigned".into(),
            }
        })?)),
    };
    let extra = object
        .get("extra")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    Ok(DecodedRecord {
        kind,
        vertex,
        pre,
        sem,
        value: decoded_value,
        extra,
        timestamp,
        byte_len: raw.len() + 1,
    })
}

/// Decodes a whole dump from memory.
///
/// The byte stream must be exactly a sequence of newline-terminated
/// records: surviving pad bytes fail the parse, which is how the
/// exact-truncation property is checked.
pub fn decode_bytes(bytes: &[u8]) -> Result<Vec<DecodedRecord>, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|err| DecodeError::Malformed {
        line: 0,
        reason: format!("dump is not UTF-8: {err}"),
    })?;
    let mut records = Vec::new();
    for (index, raw) in text.split('\n').enumerate() {
        if raw.is_empty() {
            // Legal only as the terminator after the final newline.
            continue;
        }
        records.push(decode_line(raw, index + 1)?);
    }
    Ok(records)
}

/// Decodes a dump file from disk.
pub fn decode_file(path: impl AsRef<Path>) -> Result<Vec<DecodedRecord>, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_bytes(&bytes)
}

/// Resolves the per-thread string table: id → text.
#[must_use]
pub fn string_table(records: &[DecodedRecord]) -> HashMap<u32, String> {
    records
        .iter()
        .filter(|record| record.kind == RecordKind::StringId)
        .filter_map(|record| match (record.value, record.extra.as_ref()) {
            (Some(DecodedValue::Units(id)), Some(text)) => Some((id as u32, text.clone())),
            _ => None,
        })
        .collect()
}

/// Expands `VERTEX_MOVE` records into their semantic form:
/// *ctor(to), edge(from->to), dtor(from), ctor(from)*, so downstream
/// attribution follows the moved-to slot while the moved-from slot remains
/// a valid, empty vertex.
#[must_use]
pub fn expand_moves(records: &[DecodedRecord]) -> Vec<DecodedRecord> {
    let mut expanded = Vec::with_capacity(records.len());
    for record in records {
        if record.kind != RecordKind::VertexMove {
            expanded.push(record.clone());
            continue;
        }
        let (Some(to), Some(from)) = (record.vertex, record.pre) else {
            expanded.push(record.clone());
            continue;
        };
        let template = |kind, vertex, pre| DecodedRecord {
            kind,
            vertex,
            pre,
            sem: None,
            value: None,
            extra: None,
            timestamp: record.timestamp,
            byte_len: 0,
        };
        expanded.push(template(RecordKind::VertexCtor, Some(to), None));
        let mut edge = template(RecordKind::Edge, Some(to), Some(from));
        edge.value = Some(DecodedValue::Flag(false));
        expanded.push(edge);
        expanded.push(template(RecordKind::VertexDtor, Some(from), None));
        expanded.push(template(RecordKind::VertexCtor, Some(from), None));
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        r#"{"type":"STRING_ID","value":0,"extra":"demo::Task","timestamp":1}"#,
        "\n",
        r#"{"type":"VERTEX_CTOR","vertex":{"address":16,"kind":"task","type_id":0},"timestamp":2}"#,
        "\n",
        r#"{"type":"EDGE","vertex":{"address":16,"kind":"task"},"pre":null,"value":false,"timestamp":3}"#,
        "\n",
        r#"{"type":"VERTEX_MOVE","vertex":{"address":32,"kind":"promise"},"pre":{"address":48,"kind":"promise"},"timestamp":4}"#,
        "\n",
    );

    #[test]
    fn round_trip_through_the_sample() {
        let records = decode_bytes(SAMPLE.as_bytes()).expect("decode");
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].kind, RecordKind::StringId);
        assert_eq!(records[1].vertex.expect("vertex").type_id, Some(0));
        assert_eq!(records[2].pre, Some(DecodedVertex::null()));
        assert_eq!(records[2].value, Some(DecodedValue::Flag(false)));
    }

    #[test]
    fn byte_lengths_sum_to_stream_size() {
        let records = decode_bytes(SAMPLE.as_bytes()).expect("decode");
        let total: usize = records.iter().map(|record| record.byte_len).sum();
        assert_eq!(total, SAMPLE.len());
    }

    #[test]
    fn string_table_resolves_ids() {
        let records = decode_bytes(SAMPLE.as_bytes()).expect("decode");
        let table = string_table(&records);
        assert_eq!(table.get(&0).map(String::as_str), Some("demo::Task"));
    }

    #[test]
    fn move_expansion_follows_the_semantic_order() {
        let records = decode_bytes(SAMPLE.as_bytes()).expect("decode");
        let expanded = expand_moves(&records);
        assert_eq!(expanded.len(), 7);
        let tail: Vec<_> = expanded[3..].iter().map(|r| r.kind).collect();
        assert_eq!(
            tail,
            vec![
                RecordKind::VertexCtor,
                RecordKind::Edge,
                RecordKind::VertexDtor,
                RecordKind::VertexCtor,
            ]
        );
        assert_eq!(expanded[3].vertex.expect("to").address, 32);
        assert_eq!(expanded[5].vertex.expect("from").address, 48);
    }

    #[test]
    fn reencoding_a_dump_is_byte_identical() {
        // Field order is insertion order on the wire, and `serde_json` is
        // configured to preserve it, so a parse/serialize round trip must
        // reproduce every line exactly.
        for line in SAMPLE.split('\n').filter(|l| !l.is_empty()) {
            let value: serde_json::Value = serde_json::from_str(line).expect("parse");
            let reencoded = serde_json::to_string(&value).expect("serialize");
            assert_eq!(reencoded, line);
        }
    }

    #[test]
    fn surviving_padding_fails_the_parse() {
        let mut bytes = SAMPLE.as_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(decode_bytes(&bytes).is_err());
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let line = r#"{"type":"BOGUS","timestamp":1}"#;
        assert!(matches!(
            decode_bytes(line.as_bytes()),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
