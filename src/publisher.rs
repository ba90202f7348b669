//! The request-scoped front controller tying plugins, content, cache and
//! templates together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use spcms_cache::{CacheOutcome, CacheStore, OutputSink};
use spcms_content::{ContentStore, FilterSelection};
use spcms_core::{AppError, AppResult};
use spcms_core::config::AppConfig;
use spcms_plugin::{DispatchResult, EventBus, PluginLoader, RuntimeEnv};
use spcms_plugins::language_checker::ACCEPT_LANGUAGE;

use crate::parser;
use crate::template::{self, TemplateSet};

/// Published once the publisher is fully set up.
pub const CONSTRUCT_COMPLETE_EVENT: &str = "sandbox.construct_complete";

/// Cache namespace of rendered pages.
pub const PAGE_NAMESPACE: &str = "pages";

/// One publishing run: a configured bus, its content and a template.
#[derive(Debug)]
pub struct Publisher {
    config: AppConfig,
    base_dir: PathBuf,
    bus: Arc<EventBus>,
    content: ContentStore,
    cache: CacheStore,
    templates: TemplateSet,
}

impl Publisher {
    /// Sets up plugins, templates and the cache from `config`, then
    /// publishes `sandbox.construct_complete`.
    ///
    /// Unusable search roots or template folders are skipped with a
    /// warning. Plugins listed in `plugins.load` must load.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let base_dir = PathBuf::from(&config.base_dir);
        let env = Arc::new(runtime_env(&config));

        let loader = PluginLoader::new(base_dir.clone(), env)
            .with_settings(config.plugins.settings.clone());
        spcms_plugins::register_builtin(&loader);
        for root in &config.plugins.search_roots {
            if !loader.add_search_root(root, config.plugins.recursive) {
                warn!(root = %root, "Plugin search root skipped");
            }
        }

        let bus = Arc::new(EventBus::new(loader).with_strict(config.plugins.strict_dispatch));
        for name in &config.plugins.load {
            bus.load(name)?;
        }

        let mut templates = TemplateSet::new();
        for folder in &config.template.folders {
            if !templates.add_folder(&base_dir, folder) {
                warn!(folder = %folder, "Template folder skipped");
            }
        }
        if let Some(name) = &config.template.name {
            templates.select(name)?;
        }

        let cache = CacheStore::from_config(&config.cache, &base_dir)?;
        let content = ContentStore::new(bus.clone());

        let publisher = Self {
            config,
            base_dir,
            bus,
            content,
            cache,
            templates,
        };
        publisher.publish(CONSTRUCT_COMPLETE_EVENT, &mut Value::Null)?;

        info!(
            plugins = ?publisher.bus.loader().loaded(),
            template = ?publisher.templates.selected(),
            "Publisher ready"
        );
        Ok(publisher)
    }

    /// The configuration this publisher was built from.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The event bus (and through it the plugin loader).
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Content items and filter stacks.
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// The page and fragment cache.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Dispatches `event` with `arg` on the bus.
    pub fn publish(&self, event: &str, arg: &mut Value) -> AppResult<DispatchResult> {
        self.bus.dispatch(event, arg)
    }

    /// Reads a page file into content items. Relative paths resolve
    /// against the base directory.
    pub fn parse(&self, page: impl AsRef<Path>) -> AppResult<bool> {
        parser::parse_page(&self.config.resolve_path(page), &self.content)
    }

    /// Adds a template folder.
    pub fn add_template_folder(&mut self, folder: &str) -> bool {
        self.templates.add_folder(&self.base_dir, folder)
    }

    /// Selects the template `<name>.tpl`.
    pub fn set_template(&mut self, name: &str) -> AppResult<PathBuf> {
        self.templates.select(name)
    }

    /// The selected template file.
    pub fn template(&self) -> Option<&Path> {
        self.templates.selected()
    }

    /// Renders the selected template.
    pub fn render(&self) -> AppResult<String> {
        self.templates.render(&self.content)
    }

    /// Writes the rendered `page` to `out`.
    ///
    /// A fresh copy in the page cache is replayed as is. Otherwise the page
    /// is parsed and rendered, written out, and stored when the cache is
    /// enabled. A failure to store is logged; the page has been written.
    pub fn write_page(
        &self,
        page: impl AsRef<Path>,
        out: &mut dyn OutputSink,
    ) -> AppResult<CacheOutcome> {
        let page = page.as_ref();
        let key = page.to_string_lossy();

        let outcome = self.cache.echo_or_record(out, &key, Some(PAGE_NAMESPACE), None)?;
        if outcome == CacheOutcome::Emitted {
            info!(page = %key, "Page served from cache");
            return Ok(outcome);
        }

        let html = match self.render_page(page) {
            Ok(html) => html,
            Err(e) => {
                out.stop_capture();
                return Err(e);
            }
        };
        out.emit(html.as_bytes())?;

        if let Err(e) = self.cache.record_output(out, &key, Some(PAGE_NAMESPACE), None) {
            warn!(page = %key, error = %e, "Rendered page not cached");
        }
        Ok(outcome)
    }

    fn render_page(&self, page: &Path) -> AppResult<String> {
        if !self.parse(page)? {
            return Err(AppError::not_found(format!(
                "Page '{}' is not a readable file",
                page.display()
            )));
        }
        self.render()
    }

    /// One content item through the active filters, as page text.
    pub fn show(&self, name: &str) -> AppResult<String> {
        let value = self.content.get_item(name, FilterSelection::Active)?;
        Ok(template::display(&value))
    }
}

/// Request attributes handed to plugin factories.
fn runtime_env(config: &AppConfig) -> RuntimeEnv {
    let mut attributes = config.request.extra.clone();
    if let Some(accept_language) = &config.request.accept_language {
        attributes.insert(ACCEPT_LANGUAGE.to_string(), accept_language.clone());
    }
    RuntimeEnv {
        production: config.production,
        attributes,
    }
}
