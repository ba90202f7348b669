//! Dynamically typed values flowing through content items, event
//! arguments and cache entries.

pub use serde_json::Value;

/// Runtime type name of a value, as used in `contentfilter.<type>.<name>`
/// event names.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
