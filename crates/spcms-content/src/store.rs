//! Named content items read through the filter pipeline.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use spcms_core::{AppResult, Value};
use spcms_plugin::EventBus;

use crate::filter::{FilterSelection, FilterStacks, filter_event};

/// Content items of one request plus their filter stacks.
///
/// Locks are released before any filter runs, so filter handlers may use
/// the store themselves.
#[derive(Debug)]
pub struct ContentStore {
    bus: Arc<EventBus>,
    items: RwLock<BTreeMap<String, Value>>,
    stacks: RwLock<FilterStacks>,
}

impl ContentStore {
    /// Creates an empty store dispatching filters on `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            items: RwLock::new(BTreeMap::new()),
            stacks: RwLock::new(FilterStacks::default()),
        }
    }

    /// The bus filters are dispatched on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Stores `value` under `name`, replacing any previous value.
    pub fn set_item(&self, name: &str, value: impl Into<Value>) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.into());
    }

    /// Reads `name` through the filters chosen by `selection`.
    ///
    /// A missing item reads as `null`.
    pub fn get_item(&self, name: &str, selection: impl Into<FilterSelection>) -> AppResult<Value> {
        let selection = selection.into();
        let value = self.raw(name);

        let filters = self
            .stacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&selection);

        match filters {
            Some(filters) => self.apply_filters(value, &filters),
            None => Ok(value),
        }
    }

    /// Runs `value` through `filters` in order.
    ///
    /// Each step dispatches on the value's type at that point, so a filter
    /// changing the type routes the next one differently. A filter nobody
    /// handles leaves the value unchanged.
    pub fn apply_filters(&self, mut value: Value, filters: &[String]) -> AppResult<Value> {
        for filter in filters {
            let event = filter_event(&value, filter);
            let result = self.bus.dispatch(&event, &mut value)?;
            if result.is_empty() {
                debug!(event = %event, "No handler for filter");
            }
        }
        Ok(value)
    }

    /// Whether `name` holds a value.
    pub fn has_item(&self, name: &str) -> bool {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Removes `name`, returning its value.
    pub fn remove_item(&self, name: &str) -> Option<Value> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Item names, sorted.
    pub fn item_names(&self) -> Vec<String> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Appends text to a string item, creating it if missing.
    ///
    /// A non-string item is replaced by its JSON text followed by `text`.
    pub fn append_item(&self, name: &str, text: &str) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let slot = items
            .entry(name.to_string())
            .or_insert_with(|| Value::String(String::new()));
        match slot {
            Value::String(current) => current.push_str(text),
            other => {
                let prefix = if other.is_null() {
                    String::new()
                } else {
                    other.to_string()
                };
                *other = Value::String(prefix + text);
            }
        }
    }

    /// Adds a persistent filter. Returns `false` if it was already active.
    pub fn add_filter(&self, filter: &str) -> bool {
        let mut stacks = self.write_stacks();
        if filter.is_empty() || stacks.persistent.iter().any(|f| f == filter) {
            return false;
        }
        stacks.persistent.push(filter.to_string());
        true
    }

    /// Removes a persistent filter. Returns whether it was active.
    pub fn remove_filter(&self, filter: &str) -> bool {
        let mut stacks = self.write_stacks();
        let before = stacks.persistent.len();
        stacks.persistent.retain(|f| f != filter);
        stacks.persistent.len() != before
    }

    /// Replaces the persistent stack.
    pub fn set_filters<I, S>(&self, filters: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_stacks().persistent = filters.into_iter().map(Into::into).collect();
    }

    /// Clears the persistent stack and any pending disposable filters.
    pub fn clear_filters(&self) {
        let mut stacks = self.write_stacks();
        stacks.persistent.clear();
        stacks.disposable.clear();
    }

    /// Queues disposable filters for the next `Active` read.
    pub fn queue_filters<I, S>(&self, filters: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_stacks().disposable = filters.into_iter().map(Into::into).collect();
    }

    /// The persistent filters in application order.
    pub fn filters(&self) -> Vec<String> {
        self.stacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .persistent
            .clone()
    }

    fn raw(&self, name: &str) -> Value {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn write_stacks(&self) -> std::sync::RwLockWriteGuard<'_, FilterStacks> {
        self.stacks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spcms_core::{AppError, ErrorKind};
    use spcms_plugin::{ClosurePlugin, PluginLoader, RuntimeEnv};

    fn string_filter(name: &'static str, f: fn(&str) -> String) -> ClosurePlugin {
        ClosurePlugin::new(name).method("apply", move |arg: &mut Value, _: &EventBus| {
            if let Value::String(s) = arg {
                *s = f(s);
            }
            Ok(Value::Null)
        })
    }

    fn store_with_filters(strict: bool) -> ContentStore {
        let loader = PluginLoader::new(".", Arc::new(RuntimeEnv::default()));
        let bus = EventBus::new(loader).with_strict(strict);

        bus.register(
            "contentfilter.string.upper",
            string_filter("Upper", |s| s.to_uppercase()).into_plugin(),
            "apply",
        );
        bus.register(
            "contentfilter.string.trim",
            string_filter("Trim", |s| s.trim().to_string()).into_plugin(),
            "apply",
        );
        bus.register(
            "contentfilter.string.size",
            ClosurePlugin::new("Size")
                .method("apply", |arg, _| {
                    let len = arg.as_str().map(|s| s.chars().count()).unwrap_or(0);
                    *arg = json!(len);
                    Ok(Value::Null)
                })
                .into_plugin(),
            "apply",
        );
        bus.register(
            "contentfilter.integer.double",
            ClosurePlugin::new("Double")
                .method("apply", |arg, _| {
                    *arg = json!(arg.as_i64().unwrap_or(0) * 2);
                    Ok(Value::Null)
                })
                .into_plugin(),
            "apply",
        );
        bus.register(
            "contentfilter.string.broken",
            ClosurePlugin::new("Broken")
                .method("apply", |_, _| Err(AppError::handler("filter failed")))
                .into_plugin(),
            "apply",
        );

        ContentStore::new(Arc::new(bus))
    }

    #[test]
    fn test_missing_item_reads_as_null() {
        let store = store_with_filters(false);
        assert_eq!(store.get_item("nothing", FilterSelection::Raw).unwrap(), Value::Null);
        assert_eq!(store.get_item("nothing", true).unwrap(), Value::Null);
    }

    #[test]
    fn test_empty_explicit_list_returns_raw_value() {
        let store = store_with_filters(false);
        store.set_item("title", "  hi  ");
        store.set_filters(["upper", "trim"]);

        let value = store.get_item("title", FilterSelection::Once(Vec::new())).unwrap();
        assert_eq!(value, json!("  hi  "));
    }

    #[test]
    fn test_persistent_filters_apply_in_order() {
        let store = store_with_filters(false);
        store.set_item("title", "  hi  ");
        store.set_filters(["upper", "trim"]);

        assert_eq!(store.get_item("title", true).unwrap(), json!("HI"));
        assert_eq!(store.get_item("title", true).unwrap(), json!("HI"));
        assert_eq!(store.get_item("title", false).unwrap(), json!("  hi  "));
    }

    #[test]
    fn test_explicit_filters_take_priority_once() {
        let store = store_with_filters(false);
        store.set_item("title", "  hi  ");
        store.set_filters(["trim"]);

        assert_eq!(
            store.get_item("title", FilterSelection::once(["upper"])).unwrap(),
            json!("  HI  ")
        );
        assert_eq!(store.get_item("title", true).unwrap(), json!("hi"));
    }

    #[test]
    fn test_queued_filters_are_consumed_by_one_read() {
        let store = store_with_filters(false);
        store.set_item("title", " a ");
        store.add_filter("trim");
        store.queue_filters(["upper"]);

        assert_eq!(store.get_item("title", true).unwrap(), json!(" A "));
        assert_eq!(store.get_item("title", true).unwrap(), json!("a"));
    }

    #[test]
    fn test_type_is_reevaluated_between_filters() {
        let store = store_with_filters(false);
        store.set_item("title", "hello");

        let value = store
            .get_item("title", FilterSelection::once(["size", "double", "upper"]))
            .unwrap();
        assert_eq!(value, json!(10));
    }

    #[test]
    fn test_unhandled_filter_passes_value_through() {
        let store = store_with_filters(false);
        store.set_item("list", json!([3, 1]));

        let value = store
            .get_item("list", FilterSelection::once(["upper"]))
            .unwrap();
        assert_eq!(value, json!([3, 1]));
    }

    #[test]
    fn test_failing_filter_is_isolated_unless_strict() {
        let store = store_with_filters(false);
        store.set_item("title", " x ");
        let value = store
            .get_item("title", FilterSelection::once(["broken", "trim"]))
            .unwrap();
        assert_eq!(value, json!("x"));

        let strict = store_with_filters(true);
        strict.set_item("title", " x ");
        let err = strict
            .get_item("title", FilterSelection::once(["broken", "trim"]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Handler);
    }

    #[test]
    fn test_persistent_stack_mutation() {
        let store = store_with_filters(false);

        assert!(store.add_filter("upper"));
        assert!(!store.add_filter("upper"));
        assert!(store.add_filter("trim"));
        assert_eq!(store.filters(), vec!["upper", "trim"]);

        assert!(store.remove_filter("upper"));
        assert!(!store.remove_filter("upper"));
        assert_eq!(store.filters(), vec!["trim"]);

        store.queue_filters(["upper"]);
        store.clear_filters();
        store.set_item("t", " a ");
        assert!(store.filters().is_empty());
        assert_eq!(store.get_item("t", true).unwrap(), json!(" a "));
    }

    #[test]
    fn test_item_bookkeeping() {
        let store = store_with_filters(false);
        store.append_item("Body", "line 1\n");
        store.append_item("Body", "line 2\n");
        store.set_item("Title", "x");
        store.set_item("Title", "y");

        assert_eq!(store.get_item("Body", false).unwrap(), json!("line 1\nline 2\n"));
        assert_eq!(store.get_item("Title", false).unwrap(), json!("y"));
        assert_eq!(store.item_names(), vec!["Body", "Title"]);
        assert!(store.has_item("Title"));
        assert_eq!(store.remove_item("Title"), Some(json!("y")));
        assert!(!store.has_item("Title"));
    }
}
