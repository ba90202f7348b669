//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod cache;
pub mod logging;
pub mod plugin;
pub mod request;
pub mod template;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use self::cache::CacheConfig;
use self::logging::LoggingConfig;
use self::plugin::PluginConfig;
use self::request::RequestConfig;
use self::template::TemplateConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// files (`default.toml` + environment overlay + `SPCMS__*` variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Production instances hide debug output.
    #[serde(default)]
    pub production: bool,
    /// Directory relative paths are resolved against.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// Cache store settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Plugin loader and event bus settings.
    #[serde(default)]
    pub plugins: PluginConfig,
    /// Template settings.
    #[serde(default)]
    pub template: TemplateConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Request attributes.
    #[serde(default)]
    pub request: RequestConfig,
}

impl AppConfig {
    /// Load configuration from TOML files in `dir`.
    ///
    /// Merges `default.toml` with an environment-specific overlay and
    /// environment variables prefixed with `SPCMS__`. Missing files are
    /// skipped.
    pub fn load(dir: impl AsRef<Path>, env: &str) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        let config = config::Config::builder()
            .add_source(
                config::File::with_name(&dir.join("default").to_string_lossy()).required(false),
            )
            .add_source(config::File::with_name(&dir.join(env).to_string_lossy()).required(false))
            .add_source(
                config::Environment::with_prefix("SPCMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        tracing::debug!(dir = %dir.display(), env, production = loaded.production, "Configuration loaded");
        Ok(loaded)
    }

    /// Resolve a configured path against `base_dir` unless it is absolute.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let candidate = path.as_ref();
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            Path::new(&self.base_dir).join(candidate)
        }
    }
}

fn default_base_dir() -> String {
    ".".to_string()
}
