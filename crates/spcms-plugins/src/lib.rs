//! # spcms-plugins
//!
//! Plugins shipped with the sandbox publisher:
//!
//! - `BasicFilters`: Liquid-style content filters
//! - `DebugLog`: collects messages and prints them into non-production pages
//! - `CanonicalLink`: `<link rel="canonical">` with sorted query parameters
//! - `LanguageChecker`: `Accept-Language` negotiation against enabled languages
//!
//! Each plugin still needs a manifest in a search root to be loadable by
//! name; [`register_builtin`] only makes their factories known.

pub mod canonical_link;
pub mod debug_log;
pub mod filters;
pub mod language_checker;

use tracing::debug;

use spcms_plugin::PluginLoader;

pub use canonical_link::CanonicalLink;
pub use debug_log::DebugLog;
pub use filters::BasicFilters;
pub use language_checker::LanguageChecker;

/// Canonical names of the built-in plugins.
pub const BUILTIN_PLUGINS: &[&str] = &[
    filters::NAME,
    debug_log::NAME,
    canonical_link::NAME,
    language_checker::NAME,
];

/// Registers the factories of all built-in plugins.
pub fn register_builtin(loader: &PluginLoader) {
    loader.register_factory(filters::NAME, BasicFilters::create);
    loader.register_factory(debug_log::NAME, DebugLog::create);
    loader.register_factory(canonical_link::NAME, CanonicalLink::create);
    loader.register_factory(language_checker::NAME, LanguageChecker::create);
    debug!(count = BUILTIN_PLUGINS.len(), "Built-in plugin factories registered");
}
