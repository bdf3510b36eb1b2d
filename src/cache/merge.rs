//! Reconciliation of an incoming change with the locally cached record.
//!
//! Every write path (local edits, server-confirmed results, fetched rows) goes through
//! [`merge_record`], so replacing last-writer-wins with a versioned strategy only
//! touches this file.

use serde_json::Value;

/// Merge `incoming` over `existing`, last writer wins.
///
/// Object fields present in `incoming` replace the stored ones, nested objects merge
/// recursively, and everything absent from `incoming` is kept. Non-object values
/// replace wholesale. Applying the same input twice yields the same record.
pub fn merge_record(existing: Option<Value>, incoming: Value) -> Value {
  match (existing, incoming) {
    (Some(Value::Object(mut base)), Value::Object(patch)) => {
      for (key, value) in patch {
        let merged = match base.remove(&key) {
          Some(old @ Value::Object(_)) if value.is_object() => merge_record(Some(old), value),
          _ => value,
        };
        base.insert(key, merged);
      }
      Value::Object(base)
    }
    (_, incoming) => incoming,
  }
}
