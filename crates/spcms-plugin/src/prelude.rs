//! Prelude for plugin implementations.

pub use serde_json::Value;

pub use spcms_core::{AppError, AppResult};

pub use crate::bus::{DispatchResult, EventBus};
pub use crate::closure::ClosurePlugin;
pub use crate::loader::PluginLoader;
pub use crate::plugin::{Plugin, PluginContext, RuntimeEnv, unknown_method};
