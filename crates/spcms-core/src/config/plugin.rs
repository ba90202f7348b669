//! Plugin system configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Plugin loader and event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directories searched for plugin manifests, in priority order.
    #[serde(default = "default_search_roots")]
    pub search_roots: Vec<String>,
    /// Whether sub directories of every search root are added too.
    #[serde(default)]
    pub recursive: bool,
    /// Plugins instantiated at startup.
    #[serde(default)]
    pub load: Vec<String>,
    /// Abort dispatch on the first failing handler instead of isolating it.
    #[serde(default)]
    pub strict_dispatch: bool,
    /// Per-plugin configuration slices keyed by canonical plugin name.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            search_roots: default_search_roots(),
            recursive: false,
            load: Vec::new(),
            strict_dispatch: false,
            settings: HashMap::new(),
        }
    }
}

fn default_search_roots() -> Vec<String> {
    vec!["./plugins".to_string()]
}
