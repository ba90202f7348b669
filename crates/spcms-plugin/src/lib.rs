//! # spcms-plugin
//!
//! Plugin runtime for the sandbox publisher. Provides:
//!
//! - The `Plugin` trait and factory type
//! - A loader resolving plugin names through search roots to singletons
//! - An event bus with ordered subscriptions and lazily resolved handlers
//! - Per-handler fault isolation with an optional strict mode

pub mod bus;
pub mod closure;
pub mod loader;
pub mod plugin;
pub mod prelude;

pub use bus::{DispatchResult, EventBus, HandlerOutcome, HandlerRef, Subscription};
pub use closure::ClosurePlugin;
pub use loader::PluginLoader;
pub use plugin::{Plugin, PluginContext, PluginFactory, RuntimeEnv, canonical_name, unknown_method};
