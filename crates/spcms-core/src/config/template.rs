//! Template lookup configuration.

use serde::{Deserialize, Serialize};

/// Template folders and the template selected at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Folders searched for `<name>.tpl`, in priority order.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    /// Template selected at startup, without extension.
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            folders: default_folders(),
            name: None,
        }
    }
}

fn default_folders() -> Vec<String> {
    vec!["./templates".to_string()]
}
