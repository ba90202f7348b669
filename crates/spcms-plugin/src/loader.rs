//! Plugin loader: search roots, factory registry and singleton table.
//!
//! A plugin is available when two things hold: a manifest file
//! `<requested name>.toml` exists either as an absolute path or below one of
//! the search roots, and a factory is registered for the canonical name.
//! The first root containing the manifest wins; same-named manifests in
//! later roots are never looked at.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use spcms_core::{AppError, AppResult};

use crate::plugin::{Plugin, PluginContext, PluginFactory, RuntimeEnv, canonical_name};

/// File extension of plugin manifests.
pub const MANIFEST_EXTENSION: &str = "toml";

/// Resolves plugin names to singleton instances.
pub struct PluginLoader {
    /// Directory relative search roots are resolved against.
    base_dir: PathBuf,
    /// Search roots in insertion order.
    roots: RwLock<Vec<PathBuf>>,
    /// Canonical name → factory.
    factories: RwLock<HashMap<String, PluginFactory>>,
    /// Canonical name → live instance.
    instances: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    /// Canonical name → configuration slice.
    settings: HashMap<String, Value>,
    /// Shared runtime information handed to every factory.
    env: Arc<RuntimeEnv>,
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("base_dir", &self.base_dir)
            .field("roots", &self.search_roots())
            .field("factories", &self.factory_names())
            .field("loaded", &self.loaded())
            .finish()
    }
}

impl PluginLoader {
    /// Creates a loader with no roots, factories or instances.
    pub fn new(base_dir: impl Into<PathBuf>, env: Arc<RuntimeEnv>) -> Self {
        Self {
            base_dir: base_dir.into(),
            roots: RwLock::new(Vec::new()),
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            settings: HashMap::new(),
            env,
        }
    }

    /// Sets the per-plugin configuration slices.
    pub fn with_settings(mut self, settings: HashMap<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    /// Registers (or replaces) the factory for a canonical plugin name.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn(PluginContext) -> AppResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let canonical = canonical_name(name).to_string();
        debug!(plugin = %canonical, "Plugin factory registered");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical, Arc::new(factory));
    }

    /// Adds a directory to the search roots.
    ///
    /// Relative paths resolve against the base directory. Adding a root
    /// twice is a no-op that still succeeds. With `recursive`, every sub
    /// directory found right now is added as a root of its own.
    pub fn add_search_root(&self, path: impl AsRef<Path>, recursive: bool) -> bool {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return false;
        }

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };

        let resolved = match fs::canonicalize(&joined) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(path = %joined.display(), error = %e, "Search root not resolvable");
                return false;
            }
        };

        if self.search_roots().contains(&resolved) {
            return true;
        }

        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %resolved.display(), error = %e, "Search root not readable");
                return false;
            }
        };

        self.roots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resolved.clone());
        info!(path = %resolved.display(), recursive, "Plugin search root added");

        if recursive {
            let mut children: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|child| child.is_dir())
                .collect();
            children.sort();
            for child in children {
                self.add_search_root(&child, true);
            }
        }

        true
    }

    /// Returns the search roots in insertion order.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves the manifest of a plugin without instantiating it.
    ///
    /// Checks `name` as an absolute path first, then every search root in
    /// insertion order.
    pub fn need(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        let file = format!("{name}.{MANIFEST_EXTENSION}");

        let direct = Path::new(&file);
        if direct.is_absolute() && is_readable_file(direct) {
            return fs::canonicalize(direct).ok();
        }

        self.search_roots()
            .into_iter()
            .map(|root| root.join(&file))
            .find(|candidate| is_readable_file(candidate))
    }

    /// Stores a live instance as the singleton of its canonical name.
    ///
    /// Returns the canonical name. An existing instance is replaced.
    pub fn register_instance(&self, instance: Arc<dyn Plugin>) -> String {
        let canonical = canonical_name(instance.name()).to_string();
        let previous = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical.clone(), instance.clone());
        if previous.is_some_and(|old| !Arc::ptr_eq(&old, &instance)) {
            warn!(plugin = %canonical, "Plugin instance replaced by eager registration");
        }
        canonical
    }

    /// Returns the singleton for `name`, creating it on first use.
    ///
    /// The boolean is `true` when the instance was created by this call;
    /// the caller then runs the plugin's `init` hook.
    pub fn instantiate(&self, name: &str) -> AppResult<(Arc<dyn Plugin>, bool)> {
        if name.is_empty() {
            return Err(AppError::validation("Plugin name must not be empty"));
        }
        let canonical = canonical_name(name);

        if let Some(existing) = self.get(canonical) {
            return Ok((existing, false));
        }

        let manifest = self
            .need(name)
            .ok_or_else(|| AppError::not_found(format!("Plugin '{name}' is not available")))?;

        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(canonical)
            .cloned()
            .ok_or_else(|| {
                AppError::not_found(format!("No factory registered for plugin '{canonical}'"))
            })?;

        let context = PluginContext {
            name: canonical.to_string(),
            path: manifest
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            config: self.settings_for(canonical),
            env: self.env.clone(),
        };

        let instance = factory(context)?;

        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(raced) = instances.get(canonical) {
            // A factory that loads itself re-entrantly already stored one.
            return Ok((raced.clone(), false));
        }
        instances.insert(canonical.to_string(), instance.clone());
        drop(instances);

        info!(plugin = %canonical, manifest = %manifest.display(), "Plugin instantiated");

        Ok((instance, true))
    }

    /// Configuration slice of a plugin, `null` when none is configured.
    ///
    /// Keys coming from environment overrides may be lowercased, so an
    /// exact match is preferred and a case-insensitive one accepted.
    pub fn settings_for(&self, canonical: &str) -> Value {
        self.settings
            .get(canonical)
            .or_else(|| {
                self.settings
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(canonical))
                    .map(|(_, slice)| slice)
            })
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Removes a singleton (used when a fresh plugin's `init` fails).
    pub fn evict(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(canonical_name(name))
    }

    /// Returns the singleton for `name` if one exists.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(canonical_name(name))
            .cloned()
    }

    /// Whether a singleton exists for `name`.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Canonical names of all live instances, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Canonical names with a registered factory, sorted.
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}
