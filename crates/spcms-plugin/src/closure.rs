//! Closure-based plugin for quick handler creation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use spcms_core::AppResult;

use crate::bus::EventBus;
use crate::plugin::{Plugin, unknown_method};

type Method = Arc<dyn Fn(&mut Value, &EventBus) -> AppResult<Value> + Send + Sync>;

/// A plugin whose handler methods are closures.
///
/// Subscriptions declared with [`ClosurePlugin::on`] are made when the
/// plugin is initialised, the same way hand-written plugins subscribe
/// themselves in `init`.
#[derive(Clone)]
pub struct ClosurePlugin {
    name: String,
    methods: HashMap<String, Method>,
    subscriptions: Vec<(String, String)>,
}

impl std::fmt::Debug for ClosurePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ClosurePlugin")
            .field("name", &self.name)
            .field("methods", &methods)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl ClosurePlugin {
    /// Creates a plugin without methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Adds a handler method.
    pub fn method<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut Value, &EventBus) -> AppResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Subscribes `method` to `event` once the plugin is initialised.
    pub fn on(mut self, event: &str, method: &str) -> Self {
        self.subscriptions
            .push((event.to_string(), method.to_string()));
        self
    }

    /// Wraps the plugin for registration.
    pub fn into_plugin(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }
}

impl Plugin for ClosurePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, bus: &EventBus) -> AppResult<()> {
        for (event, method) in &self.subscriptions {
            bus.register(event, self.name.as_str(), method);
        }
        Ok(())
    }

    fn call(&self, method: &str, arg: &mut Value, bus: &EventBus) -> AppResult<Value> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| unknown_method(&self.name, method))?;
        handler(arg, bus)
    }
}
