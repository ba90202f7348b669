//! `BasicFilters`: Liquid-style content filters.
//!
//! Every filter is a handler for `contentfilter.<type>.<filter>`. It
//! replaces the argument with the filtered value and returns that value.

pub mod date;
pub mod text;

use std::cmp::Ordering;

use serde_json::Value;

use spcms_core::{AppError, AppResult, type_name};
use spcms_plugin::{EventBus, Plugin, PluginContext, unknown_method};

use date::DateFormat;

/// Canonical plugin name.
pub const NAME: &str = "BasicFilters";

/// `(value type, filter name, handler method)`.
const SUBSCRIPTIONS: &[(&str, &str, &str)] = &[
    ("string", "capitalize", "capitalize"),
    ("string", "downcase", "downcase"),
    ("string", "lowercase", "downcase"),
    ("string", "upcase", "upcase"),
    ("string", "uppercase", "upcase"),
    ("string", "size", "size_of_string"),
    ("string", "escape", "escape"),
    ("string", "escape_once", "escape_once"),
    ("string", "strip_html", "strip_html"),
    ("string", "strip_newlines", "strip_newlines"),
    ("string", "newline_to_br", "newline_to_br"),
    ("string", "xml_escape", "xml_escape"),
    ("string", "cgi_escape", "cgi_escape"),
    ("string", "number_of_words", "number_of_words"),
    ("string", "trim", "trim"),
    ("string", "date_to_atom", "date_to_atom"),
    ("string", "date_to_rss", "date_to_rss"),
    ("string", "date_to_xmlschema", "date_to_xmlschema"),
    ("string", "date_to_string", "date_to_string"),
    ("string", "date_to_long_string", "date_to_long_string"),
    ("integer", "date_to_atom", "timestamp_to_atom"),
    ("integer", "date_to_rss", "timestamp_to_rss"),
    ("integer", "date_to_xmlschema", "timestamp_to_xmlschema"),
    ("integer", "date_to_string", "timestamp_to_string"),
    ("integer", "date_to_long_string", "timestamp_to_long_string"),
    ("array", "sort", "sort"),
    ("array", "size", "size_of_array"),
    ("array", "array_to_sentence_string", "array_to_sentence_string"),
];

/// Liquid-style filters for strings, timestamps and arrays.
#[derive(Debug, Default)]
pub struct BasicFilters;

impl BasicFilters {
    /// Factory registered with the plugin loader.
    pub fn create(_ctx: PluginContext) -> AppResult<std::sync::Arc<dyn Plugin>> {
        Ok(std::sync::Arc::new(Self))
    }

    /// Filter names handled for values of `type_name`.
    pub fn filters_for(type_name: &str) -> Vec<&'static str> {
        SUBSCRIPTIONS
            .iter()
            .filter(|(ty, _, _)| *ty == type_name)
            .map(|(_, filter, _)| *filter)
            .collect()
    }

    fn apply(method: &str, arg: &Value) -> AppResult<Option<Value>> {
        let value = match method {
            "capitalize" => Value::from(text::capitalize(expect_str(method, arg)?)),
            "downcase" => Value::from(expect_str(method, arg)?.to_lowercase()),
            "upcase" => Value::from(expect_str(method, arg)?.to_uppercase()),
            "size_of_string" => Value::from(expect_str(method, arg)?.chars().count()),
            "escape" => Value::from(text::escape(expect_str(method, arg)?)),
            "escape_once" => Value::from(text::escape_once(expect_str(method, arg)?)),
            "strip_html" => Value::from(text::strip_html(expect_str(method, arg)?)),
            "strip_newlines" => Value::from(text::strip_newlines(expect_str(method, arg)?)),
            "newline_to_br" => Value::from(text::newline_to_br(expect_str(method, arg)?)),
            "xml_escape" => Value::from(text::xml_escape(expect_str(method, arg)?)),
            "cgi_escape" => Value::from(text::cgi_escape(expect_str(method, arg)?)),
            "number_of_words" => Value::from(text::number_of_words(expect_str(method, arg)?)),
            "trim" => Value::from(expect_str(method, arg)?.trim()),
            "sort" => {
                let mut items = expect_array(method, arg)?.clone();
                items.sort_by(compare_values);
                Value::Array(items)
            }
            "size_of_array" => Value::from(expect_array(method, arg)?.len()),
            "array_to_sentence_string" => {
                let parts: Vec<String> = expect_array(method, arg)?.iter().map(plain_text).collect();
                Value::from(parts.join(", "))
            }
            _ => {
                if let Some(format) = method
                    .strip_prefix("timestamp_to_")
                    .and_then(|suffix| DateFormat::from_filter(&format!("date_to_{suffix}")))
                {
                    let timestamp = arg.as_i64().ok_or_else(|| wrong_type(method, "integer", arg))?;
                    Value::from(date::format_timestamp(timestamp, format)?)
                } else if let Some(format) = DateFormat::from_filter(method) {
                    Value::from(date::format_date(expect_str(method, arg)?, format)?)
                } else {
                    return Ok(None);
                }
            }
        };
        Ok(Some(value))
    }
}

impl Plugin for BasicFilters {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, bus: &EventBus) -> AppResult<()> {
        for (ty, filter, method) in SUBSCRIPTIONS {
            bus.register(&format!("contentfilter.{ty}.{filter}"), NAME, method);
        }
        Ok(())
    }

    fn call(&self, method: &str, arg: &mut Value, _bus: &EventBus) -> AppResult<Value> {
        let filtered = Self::apply(method, arg)?.ok_or_else(|| unknown_method(NAME, method))?;
        *arg = filtered.clone();
        Ok(filtered)
    }
}

fn expect_str<'a>(method: &str, arg: &'a Value) -> AppResult<&'a str> {
    arg.as_str().ok_or_else(|| wrong_type(method, "string", arg))
}

fn expect_array<'a>(method: &str, arg: &'a Value) -> AppResult<&'a Vec<Value>> {
    arg.as_array().ok_or_else(|| wrong_type(method, "array", arg))
}

fn wrong_type(method: &str, expected: &str, arg: &Value) -> AppError {
    AppError::handler(format!(
        "Filter '{method}' expects {expected}, got {}",
        type_name(arg)
    ))
}

/// Strings as-is, everything else as JSON.
fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Orders numbers numerically and strings lexically; mixed types sort by
/// type (null, boolean, number, string, array, object).
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
