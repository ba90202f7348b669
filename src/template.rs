//! Template folders, template selection and rendering.
//!
//! Templates are `.tpl` files with two kinds of tags:
//!
//! - `{{ Name }}` or `{{ Name | f1 | f2 }}` prints a content item, through
//!   the given filters or the active filter stack
//! - `{% event name %}` dispatches `name` and prints what the handlers return

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info};

use spcms_content::{ContentStore, FilterSelection};
use spcms_core::{AppError, AppResult, ErrorKind};

/// File extension of templates.
pub const TEMPLATE_EXTENSION: &str = "tpl";

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*(?P<item>[A-Za-z][A-Za-z0-9_]*)\s*(?P<filters>(?:\|\s*[A-Za-z0-9_]+\s*)*)\}\}|\{%\s*event\s+(?P<event>[A-Za-z0-9_.:-]+)\s*%\}",
    )
    .expect("template tag pattern compiles")
});

/// Ordered template folders and the selected template file.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    folders: Vec<PathBuf>,
    selected: Option<PathBuf>,
}

impl TemplateSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing directory; relative paths resolve against
    /// `base_dir`. Adding a folder twice succeeds without duplicating it.
    pub fn add_folder(&mut self, base_dir: &Path, folder: &str) -> bool {
        if folder.is_empty() {
            return false;
        }
        let candidate = Path::new(folder);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base_dir.join(candidate)
        };

        let resolved = match fs::canonicalize(&joined) {
            Ok(resolved) if resolved.is_dir() => resolved,
            _ => {
                debug!(folder, "Template folder not found");
                return false;
            }
        };

        if !self.folders.contains(&resolved) {
            debug!(path = %resolved.display(), "Template folder added");
            self.folders.push(resolved);
        }
        true
    }

    /// Template folders in priority order.
    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    /// Selects `<name>.tpl` from the first folder that has it.
    pub fn select(&mut self, name: &str) -> AppResult<PathBuf> {
        let file = format!("{name}.{TEMPLATE_EXTENSION}");
        let found = self
            .folders
            .iter()
            .map(|folder| folder.join(&file))
            .find(|candidate| is_readable_file(candidate))
            .ok_or_else(|| {
                AppError::not_found(format!("Template '{name}' was not found or is not readable"))
            })?;

        info!(template = %found.display(), "Template selected");
        self.selected = Some(found.clone());
        Ok(found)
    }

    /// The selected template file.
    pub fn selected(&self) -> Option<&Path> {
        self.selected.as_deref()
    }

    /// Renders the selected template.
    pub fn render(&self, content: &ContentStore) -> AppResult<String> {
        let path = self
            .selected
            .as_deref()
            .ok_or_else(|| AppError::configuration("No template assigned"))?;
        let source = fs::read_to_string(path).map_err(|e| {
            AppError::with_source(
                ErrorKind::Io,
                format!("Failed to read template {}", path.display()),
                e,
            )
        })?;
        render_source(&source, content)
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// Renders template text against the content store and its bus.
pub fn render_source(source: &str, content: &ContentStore) -> AppResult<String> {
    let mut rendered = String::with_capacity(source.len());
    let mut last = 0;

    for caps in TAG.captures_iter(source) {
        let Some(tag) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&source[last..tag.start()]);
        rendered.push_str(&render_tag(&caps, content)?);
        last = tag.end();
    }

    rendered.push_str(&source[last..]);
    Ok(rendered)
}

fn render_tag(caps: &Captures<'_>, content: &ContentStore) -> AppResult<String> {
    if let Some(event) = caps.name("event") {
        return Ok(content.bus().publish(event.as_str())?.text());
    }

    let Some(item) = caps.name("item") else {
        return Ok(String::new());
    };
    let filters: Vec<&str> = caps
        .name("filters")
        .map(|m| {
            m.as_str()
                .split('|')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let selection = if filters.is_empty() {
        FilterSelection::Active
    } else {
        FilterSelection::once(filters)
    };
    Ok(display(&content.get_item(item.as_str(), selection)?))
}

/// Strings verbatim, `null` as nothing, everything else as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
