//! Event bus: ordered subscriptions and dispatch through the plugin loader.

pub mod dispatcher;
pub mod subscription;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use spcms_core::AppResult;

use crate::loader::PluginLoader;
use crate::plugin::{Plugin, canonical_name};

pub use dispatcher::{DispatchResult, HandlerOutcome};
pub use subscription::{HandlerRef, Subscription};

use subscription::SubscriptionTable;

/// Routes named events to ordered handler lists.
///
/// The bus owns the plugin loader, so a handler registered by name is
/// instantiated on its first dispatch and reused afterwards. No lock is
/// held while a handler runs: handlers may subscribe, unsubscribe or
/// dispatch re-entrantly. Nothing guards against a handler re-triggering
/// its own event.
#[derive(Debug)]
pub struct EventBus {
    /// Event → ordered handlers.
    subscriptions: RwLock<SubscriptionTable>,
    /// Plugin loader and singleton table.
    loader: PluginLoader,
    /// Abort dispatch on the first failure instead of isolating it.
    strict: bool,
}

impl EventBus {
    /// Creates a bus that isolates handler failures.
    pub fn new(loader: PluginLoader) -> Self {
        Self {
            subscriptions: RwLock::new(SubscriptionTable::default()),
            loader,
            strict: false,
        }
    }

    /// Enables or disables strict dispatch.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Whether the first failing handler aborts dispatch.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The plugin loader.
    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Subscribes `method` of `handler` to `event`.
    ///
    /// A live instance becomes its name's singleton right away. Subscribing
    /// an existing `(class, method)` pair again moves it to the end of the
    /// event's list. Returns `false` for empty names.
    pub fn register(&self, event: &str, handler: impl Into<HandlerRef>, method: &str) -> bool {
        let handler = handler.into();
        if event.is_empty() || method.is_empty() || handler.class().is_empty() {
            return false;
        }

        if let HandlerRef::Instance(plugin) = &handler {
            self.loader.register_instance(plugin.clone());
        }

        self.write_table()
            .subscribe(event, handler.source(), method);

        debug!(event, class = %handler.class(), method, "Handler subscribed");
        true
    }

    /// Removes the exact `(class, method)` subscription from `event`.
    ///
    /// Succeeds when nothing matched. Returns `false` for empty names.
    pub fn unregister(&self, event: &str, handler: impl Into<HandlerRef>, method: &str) -> bool {
        let handler = handler.into();
        if event.is_empty() || method.is_empty() || handler.class().is_empty() {
            return false;
        }

        if self.write_table().unsubscribe(event, handler.class(), method) {
            debug!(event, class = %handler.class(), method, "Handler unsubscribed");
        }
        true
    }

    /// Handlers of `event` in dispatch order.
    pub fn handlers(&self, event: &str) -> Vec<Subscription> {
        self.read_table().handlers(event)
    }

    /// Whether `event` has at least one handler.
    pub fn has_handlers(&self, event: &str) -> bool {
        self.read_table().count(event) > 0
    }

    /// All events with handlers, sorted.
    pub fn events(&self) -> Vec<String> {
        self.read_table().events()
    }

    /// Returns the singleton for `name`, instantiating it if needed.
    ///
    /// A freshly created plugin runs its `init` hook with this bus; if
    /// that fails the instance is discarded, the handlers it subscribed
    /// during `init` are dropped and the error returned.
    pub fn load(&self, name: &str) -> AppResult<Arc<dyn Plugin>> {
        let (plugin, fresh) = self.loader.instantiate(name)?;
        if fresh {
            let class = canonical_name(name);
            let existing = self.read_table().class_handlers(class);
            if let Err(e) = plugin.init(self) {
                self.loader.evict(name);
                let dropped = self.write_table().retain_class(class, &existing);
                warn!(plugin = %class, dropped, error = %e, "Plugin init failed");
                return Err(e);
            }
            info!(plugin = %canonical_name(name), "Plugin loaded");
        }
        Ok(plugin)
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, SubscriptionTable> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, SubscriptionTable> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::ClosurePlugin;
    use crate::plugin::RuntimeEnv;
    use serde_json::{Value, json};
    use spcms_core::{AppError, ErrorKind};
    use std::path::Path;

    fn append(tag: &'static str) -> impl Fn(&mut Value, &EventBus) -> AppResult<Value> {
        move |arg: &mut Value, _: &EventBus| {
            let current = arg.as_str().unwrap_or_default().to_string();
            *arg = Value::String(format!("{current}{tag}"));
            Ok(Value::String(tag.to_string()))
        }
    }

    /// Bus whose loader can lazily create every given plugin.
    fn bus_with(dir: &Path, plugins: Vec<ClosurePlugin>) -> EventBus {
        let loader = PluginLoader::new(dir, Arc::new(RuntimeEnv::default()));
        loader.add_search_root(dir, false);
        for plugin in plugins {
            let name = plugin.name().to_string();
            std::fs::write(dir.join(format!("{name}.toml")), "").expect("manifest");
            loader.register_factory(&name, move |_| Ok(plugin.clone().into_plugin()));
        }
        EventBus::new(loader)
    }

    #[test]
    fn test_dispatch_without_handlers_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(dir.path(), Vec::new());
        let mut arg = json!({"untouched": true});

        let result = bus.dispatch("nothing.here", &mut arg).expect("dispatch");
        assert!(result.is_empty());
        assert_eq!(arg, json!({"untouched": true}));
    }

    #[test]
    fn test_handlers_run_in_order_and_share_the_argument() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("A").method("onX", append("a")),
                ClosurePlugin::new("B").method("onX", append("b")),
            ],
        );
        assert!(bus.register("X", "A", "onX"));
        assert!(bus.register("X", "B", "onX"));

        let mut arg = Value::String(String::new());
        let result = bus.dispatch("X", &mut arg).expect("dispatch");

        assert_eq!(result.keys(), vec!["A::onX", "B::onX"]);
        assert_eq!(arg, json!("ab"));
        assert_eq!(result.text(), "ab");
    }

    #[test]
    fn test_integer_argument_threads_through_handlers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("A").method("onX", |arg, _| {
                    let seen = arg.clone();
                    *arg = json!(arg.as_i64().unwrap_or_default() * 2);
                    Ok(seen)
                }),
                ClosurePlugin::new("B")
                    .method("onX", |arg, _| Ok(json!(arg.as_i64().unwrap_or_default() + 1))),
            ],
        );
        bus.register("X", "A", "onX");
        bus.register("X", "B", "onX");

        let mut arg = json!(5);
        let result = bus.dispatch("X", &mut arg).expect("dispatch");

        assert_eq!(result.keys(), vec!["A::onX", "B::onX"]);
        assert_eq!(result.get("A::onX").cloned().expect("A ran").expect("A ok"), json!(5));
        assert_eq!(result.get("B::onX").cloned().expect("B ran").expect("B ok"), json!(11));
        assert_eq!(arg, json!(10));
    }

    #[test]
    fn test_reregistering_moves_handler_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("A").method("onX", append("a")),
                ClosurePlugin::new("B").method("onX", append("b")),
            ],
        );
        bus.register("X", "A", "onX");
        bus.register("X", "B", "onX");
        bus.register("X", "A", "onX");

        let mut arg = Value::String(String::new());
        bus.dispatch("X", &mut arg).expect("dispatch");
        assert_eq!(arg, json!("ba"));
        assert_eq!(bus.handlers("X").len(), 2);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("A").method("onX", |_, _| Err(AppError::handler("boom"))),
                ClosurePlugin::new("B").method("onX", append("b")),
            ],
        );
        bus.register("X", "A", "onX");
        bus.register("X", "B", "onX");

        let mut arg = Value::String(String::new());
        let result = bus.dispatch("X", &mut arg).expect("dispatch");

        assert_eq!(result.len(), 2);
        let failed = result.get("A::onX").expect("A ran");
        assert_eq!(failed.as_ref().expect_err("A failed").kind, ErrorKind::Handler);
        assert_eq!(result.get("B::onX").cloned().expect("B ran").expect("B ok"), json!("b"));
        assert_eq!(result.failures().len(), 1);
        assert_eq!(arg, json!("b"));
    }

    #[test]
    fn test_strict_bus_aborts_on_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("A").method("onX", |_, _| Err(AppError::handler("boom"))),
                ClosurePlugin::new("B").method("onX", append("b")),
            ],
        )
        .with_strict(true);
        bus.register("X", "A", "onX");
        bus.register("X", "B", "onX");

        let mut arg = Value::String(String::new());
        let err = bus.dispatch("X", &mut arg).expect_err("strict");
        assert_eq!(err.message, "boom");
        assert_eq!(arg, json!(""));
    }

    #[test]
    fn test_unresolvable_handler_is_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![ClosurePlugin::new("B").method("onX", append("b"))],
        );
        bus.register("X", "Missing", "onX");
        bus.register("X", "B", "onX");
        bus.register("X", "B", "nope");

        let mut arg = Value::String(String::new());
        let result = bus.dispatch("X", &mut arg).expect("dispatch");

        let missing = result.get("Missing::onX").expect("recorded");
        assert_eq!(missing.as_ref().expect_err("missing").kind, ErrorKind::NotFound);
        let unknown = result.get("B::nope").expect("recorded");
        assert_eq!(unknown.as_ref().expect_err("unknown").kind, ErrorKind::Handler);
        assert_eq!(arg, json!("b"));
    }

    #[test]
    fn test_register_rejects_empty_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(dir.path(), Vec::new());

        assert!(!bus.register("", "A", "onX"));
        assert!(!bus.register("X", "", "onX"));
        assert!(!bus.register("X", "A", ""));
        assert!(bus.events().is_empty());
    }

    #[test]
    fn test_unregister_succeeds_without_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(dir.path(), Vec::new());
        bus.register("X", "A", "onX");

        assert!(bus.unregister("X", "A", "other"));
        assert!(bus.has_handlers("X"));
        assert!(bus.unregister("X", "A", "onX"));
        assert!(!bus.has_handlers("X"));
        assert!(!bus.unregister("X", "A", ""));
    }

    #[test]
    fn test_instance_registration_needs_no_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(dir.path(), Vec::new());
        let plugin = ClosurePlugin::new("Eager").method("onX", append("e")).into_plugin();

        assert!(bus.register("X", plugin.clone(), "onX"));
        assert!(bus.loader().is_loaded("Eager"));

        let mut arg = Value::String(String::new());
        bus.dispatch("X", &mut arg).expect("dispatch");
        assert_eq!(arg, json!("e"));
    }

    #[test]
    fn test_init_subscribes_plugin_handlers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("Self")
                    .method("onX", append("s"))
                    .on("X", "onX"),
            ],
        );

        bus.load("Self").expect("load");
        bus.load("Self").expect("second load reuses the singleton");
        assert_eq!(bus.handlers("X").len(), 1);

        let mut arg = Value::String(String::new());
        bus.dispatch("X", &mut arg).expect("dispatch");
        assert_eq!(arg, json!("s"));
    }

    #[test]
    fn test_failed_init_discards_instance() {
        #[derive(Debug)]
        struct Broken;

        impl Plugin for Broken {
            fn name(&self) -> &str {
                "Broken"
            }

            fn init(&self, bus: &EventBus) -> AppResult<()> {
                bus.register("X", "Broken", "onX");
                bus.register("Y", "Broken", "onY");
                Err(AppError::configuration("missing setting"))
            }

            fn call(&self, method: &str, _arg: &mut Value, _bus: &EventBus) -> AppResult<Value> {
                Err(crate::plugin::unknown_method("Broken", method))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Broken.toml"), "").expect("manifest");
        let bus = bus_with(
            dir.path(),
            vec![ClosurePlugin::new("A").method("onX", append("a"))],
        );
        bus.loader()
            .register_factory("Broken", |_| Ok(Arc::new(Broken) as Arc<dyn Plugin>));
        bus.register("X", "A", "onX");
        bus.register("Z", "Broken", "onZ");

        let err = bus.load("Broken").expect_err("init fails");
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(!bus.loader().is_loaded("Broken"));

        // Only what init added is rolled back.
        assert_eq!(bus.events(), vec!["X".to_string(), "Z".to_string()]);
        let mut arg = Value::String(String::new());
        let result = bus.dispatch("X", &mut arg).expect("dispatch");
        assert_eq!(result.keys(), vec!["A::onX"]);
        assert_eq!(arg, json!("a"));
    }

    #[test]
    fn test_handlers_may_reenter_the_bus() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![
                ClosurePlugin::new("Outer").method("onX", |arg, bus| {
                    bus.register("X", "Late", "onX");
                    bus.dispatch("Y", arg)?;
                    Ok(Value::Null)
                }),
                ClosurePlugin::new("Inner").method("onY", append("y")),
                ClosurePlugin::new("Late").method("onX", append("late")),
            ],
        );
        bus.register("X", "Outer", "onX");
        bus.register("Y", "Inner", "onY");

        let mut arg = Value::String(String::new());
        let result = bus.dispatch("X", &mut arg).expect("dispatch");

        // Handlers added mid-dispatch only run on the next dispatch.
        assert_eq!(result.keys(), vec!["Outer::onX"]);
        assert_eq!(arg, json!("y"));
        assert_eq!(bus.handlers("X").len(), 2);
    }

    #[test]
    fn test_publish_uses_null_argument() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bus = bus_with(
            dir.path(),
            vec![ClosurePlugin::new("A").method("onX", |arg, _| Ok(json!(arg.is_null())))],
        );
        bus.register("X", "A", "onX");

        let result = bus.publish("X").expect("publish");
        assert_eq!(result.get("A::onX").cloned().expect("ran").expect("ok"), json!(true));
    }
}
