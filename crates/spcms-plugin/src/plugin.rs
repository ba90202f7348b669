//! Plugin trait, construction context and factory type.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use spcms_core::{AppError, AppResult, Value};

use crate::bus::EventBus;

/// Runtime information shared by every plugin of a request context.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    /// Production instances hide debug output.
    pub production: bool,
    /// Request attributes (`accept_language`, `uri`, ...).
    pub attributes: BTreeMap<String, String>,
}

impl RuntimeEnv {
    /// Looks up a request attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Everything a factory receives when a plugin is instantiated.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Canonical plugin name.
    pub name: String,
    /// Directory holding the plugin manifest.
    pub path: PathBuf,
    /// Configuration slice for this plugin (`null` when absent).
    pub config: Value,
    /// Shared runtime information.
    pub env: Arc<RuntimeEnv>,
}

/// A unit exposing one or more event handler methods.
///
/// Instances are created at most once per canonical name and shared by
/// every dispatch afterwards, so state lives behind interior mutability.
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Canonical name, used as the `Class` part of `Class::method`.
    fn name(&self) -> &str;

    /// Called once right after the instance is stored as the singleton.
    ///
    /// Plugins usually subscribe their own handlers here.
    fn init(&self, _bus: &EventBus) -> AppResult<()> {
        Ok(())
    }

    /// Invokes handler `method` with the dispatch argument.
    ///
    /// Changes made to `arg` are visible to every later handler of the
    /// same dispatch.
    fn call(&self, method: &str, arg: &mut Value, bus: &EventBus) -> AppResult<Value>;
}

/// Builds a plugin instance from its context.
pub type PluginFactory = Arc<dyn Fn(PluginContext) -> AppResult<Arc<dyn Plugin>> + Send + Sync>;

/// Error returned by `Plugin::call` for a method the plugin does not have.
pub fn unknown_method(plugin: &str, method: &str) -> AppError {
    AppError::handler(format!("Plugin '{plugin}' has no handler method '{method}'"))
}

/// Canonical plugin name: the last path segment of the requested name.
pub fn canonical_name(name: &str) -> &str {
    name.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(name)
}
