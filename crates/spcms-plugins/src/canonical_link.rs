//! `CanonicalLink`: renders `<link rel="canonical">` into the page head.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use url::form_urlencoded::byte_serialize;

use spcms_core::{AppError, AppResult};
use spcms_plugin::{EventBus, Plugin, PluginContext, unknown_method};

use crate::filters::text::escape;

/// Canonical plugin name.
pub const NAME: &str = "CanonicalLink";

/// Canonical URL and its query parameters.
#[derive(Debug, Default)]
pub struct CanonicalLink {
    url: RwLock<Option<String>>,
    parameters: RwLock<BTreeMap<String, String>>,
}

impl CanonicalLink {
    /// Factory registered with the plugin loader.
    ///
    /// A `url` string in the configuration slice presets the URL.
    pub fn create(ctx: PluginContext) -> AppResult<Arc<dyn Plugin>> {
        let link = Self::default();
        if let Some(url) = ctx.config.get("url").and_then(Value::as_str) {
            link.set_url(url);
        }
        Ok(Arc::new(link))
    }

    /// Sets the canonical URL (without query).
    pub fn set_url(&self, url: &str) {
        *self.url.write().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
    }

    /// Adds a query parameter. Empty keys or values are ignored.
    pub fn add_parameter(&self, key: &str, value: &str) -> bool {
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        true
    }

    /// URL with its parameters sorted by key and joined by `separator`.
    pub fn canonical_uri(&self, separator: &str) -> Option<String> {
        let url = self
            .url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        let parameters = self.parameters.read().unwrap_or_else(PoisonError::into_inner);
        if parameters.is_empty() {
            return Some(url);
        }

        let query: Vec<String> = parameters
            .iter()
            .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
            .collect();
        Some(format!("{url}?{}", query.join(separator)))
    }

    fn markup(&self) -> String {
        match self.canonical_uri("&amp;") {
            Some(uri) => format!("<link rel=\"canonical\" href=\"{}\">\n", escape_attribute(&uri)),
            None => String::new(),
        }
    }
}

impl Plugin for CanonicalLink {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, bus: &EventBus) -> AppResult<()> {
        bus.register("sandbox.template_head_start", NAME, "markup");
        bus.register("canonical.set_url", NAME, "set_url");
        bus.register("canonical.add_parameter", NAME, "add_parameter");
        Ok(())
    }

    fn call(&self, method: &str, arg: &mut Value, _bus: &EventBus) -> AppResult<Value> {
        match method {
            "set_url" => {
                let url = arg
                    .as_str()
                    .ok_or_else(|| AppError::handler("CanonicalLink::set_url expects a string"))?;
                self.set_url(url);
                Ok(Value::Null)
            }
            "add_parameter" => {
                let key = arg.get("key").map(plain_text).unwrap_or_default();
                let value = arg.get("value").map(plain_text).unwrap_or_default();
                Ok(Value::Bool(self.add_parameter(&key, &value)))
            }
            "canonical_uri" => Ok(self.canonical_uri("&").map(Value::from).unwrap_or(Value::Null)),
            "markup" => Ok(Value::from(self.markup())),
            _ => Err(unknown_method(NAME, method)),
        }
    }
}

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// Escapes quotes and angle brackets; `&amp;` separators are already
/// entity-encoded and stay as they are.
fn escape_attribute(uri: &str) -> String {
    uri.split("&amp;").map(escape).collect::<Vec<_>>().join("&amp;")
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spcms_plugin::{PluginLoader, RuntimeEnv};

    fn bus_with(link: Arc<CanonicalLink>) -> EventBus {
        let bus = EventBus::new(PluginLoader::new(".", Arc::new(RuntimeEnv::default())));
        bus.loader().register_instance(link.clone());
        link.init(&bus).unwrap();
        bus
    }

    #[test]
    fn test_no_markup_without_url() {
        let bus = bus_with(Arc::new(CanonicalLink::default()));
        assert_eq!(bus.publish("sandbox.template_head_start").unwrap().text(), "");
    }

    #[test]
    fn test_markup_sorts_and_encodes_parameters() {
        let link = Arc::new(CanonicalLink::default());
        let bus = bus_with(link.clone());

        bus.dispatch("canonical.set_url", &mut json!("https://example.org/page"))
            .unwrap();
        bus.dispatch("canonical.add_parameter", &mut json!({"key": "q", "value": "a b"}))
            .unwrap();
        bus.dispatch("canonical.add_parameter", &mut json!({"key": "id", "value": 7}))
            .unwrap();
        bus.dispatch("canonical.add_parameter", &mut json!({"key": "empty", "value": ""}))
            .unwrap();

        assert_eq!(
            link.canonical_uri("&").unwrap(),
            "https://example.org/page?id=7&q=a+b"
        );
        assert_eq!(
            bus.publish("sandbox.template_head_start").unwrap().text(),
            "<link rel=\"canonical\" href=\"https://example.org/page?id=7&amp;q=a+b\">\n"
        );
    }

    #[test]
    fn test_rejects_empty_parameters() {
        let link = CanonicalLink::default();
        assert!(!link.add_parameter("", "x"));
        assert!(!link.add_parameter("x", ""));
        assert!(link.add_parameter("x", "y"));
    }
}
