//! Stored values, the blank predicate and dotted-path lookup.

pub use serde_json::Value;

/// Returns `true` when a value counts as blank.
///
/// `null`, strings that are empty after trimming, empty arrays and empty
/// objects are blank. Booleans and numbers are never blank, so `false` and `0`
/// are real values.
///
/// ```
/// use capsule_core::is_blank;
/// use serde_json::json;
///
/// assert!(is_blank(&json!(null)));
/// assert!(is_blank(&json!("  ")));
/// assert!(is_blank(&json!([])));
/// assert!(!is_blank(&json!(0)));
/// assert!(!is_blank(&json!(false)));
/// ```
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Looks up a dotted path (`"order.items.0.sku"`) inside a value.
///
/// Object segments match keys; array segments must parse as an index.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
