use serde_json::Value;

/// A record is an unordered string-keyed mapping to JSON-equivalent values.
/// `serde_json::Map` preserves insertion order internally but nothing in
/// this crate depends on that order — only on per-`id` last-writer-wins,
/// per spec.
pub type Record = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const DELETED_FIELD: &str = "_deleted";

/// Builds a tombstone record for `id`: `{"id": id, "_deleted": true}`.
pub fn tombstone(id: &str) -> Record {
    let mut record = Record::new();
    record.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    record.insert(DELETED_FIELD.to_string(), Value::Bool(true));
    record
}

pub fn is_tombstone(record: &Record) -> bool {
    matches!(record.get(DELETED_FIELD), Some(Value::Bool(true)))
}

/// Returns the record's id in canonical string form, whatever JSON type it
/// was stored as. Spec scenarios use integer ids (`{"id": 1}`) as often as
/// string ones, so a bare `as_str` would wrongly treat those as idless.
/// `None` only when the `id` key is absent or holds a non-scalar value.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Structural ordering between two JSON values, used by the predicate
/// tree's `$gt`/`$lt` operators. Returns `None` when the two values have no
/// defined ordering (e.g. a string compared to a number) — spec.md says
/// such comparisons evaluate to false rather than panicking.
pub fn partial_compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Structural equality permitting integer/float cross-comparison, per
/// spec.md §4.3.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}
