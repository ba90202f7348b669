//! Subscription table: per event, an ordered list of `(class, method)`
//! handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::plugin::{Plugin, canonical_name};

/// A handler bound to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Event name.
    pub event: String,
    /// Canonical plugin name.
    pub class: String,
    /// Handler method on the plugin.
    pub method: String,
    /// Plugin name as requested, used to locate the manifest.
    pub source: String,
}

impl Subscription {
    /// Key of this handler in a dispatch result: `Class::method`.
    pub fn key(&self) -> String {
        format!("{}::{}", self.class, self.method)
    }

    fn same_handler(&self, class: &str, method: &str) -> bool {
        self.class == class && self.method == method
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}::{}", self.event, self.class, self.method)
    }
}

/// Who handles an event: a plugin name resolved lazily at dispatch time,
/// or a live instance registered eagerly.
#[derive(Debug, Clone)]
pub enum HandlerRef {
    /// Plugin name, optionally with a path (`renderer/BasicFilters`).
    Name(String),
    /// Live instance, stored immediately as its name's singleton.
    Instance(Arc<dyn Plugin>),
}

impl HandlerRef {
    /// Name used to locate the plugin source.
    pub fn source(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Instance(plugin) => plugin.name(),
        }
    }

    /// Canonical plugin name.
    pub fn class(&self) -> &str {
        canonical_name(self.source())
    }
}

impl From<&str> for HandlerRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for HandlerRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Arc<dyn Plugin>> for HandlerRef {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        Self::Instance(plugin)
    }
}

/// Event name → ordered handlers.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    events: HashMap<String, Vec<Subscription>>,
}

impl SubscriptionTable {
    /// Appends a handler; an existing identical `(class, method)` moves to
    /// the end instead of being duplicated.
    pub(crate) fn subscribe(&mut self, event: &str, source: &str, method: &str) {
        let class = canonical_name(source).to_string();
        let entries = self.events.entry(event.to_string()).or_default();
        entries.retain(|s| !s.same_handler(&class, method));
        entries.push(Subscription {
            event: event.to_string(),
            class,
            method: method.to_string(),
            source: source.to_string(),
        });
    }

    /// Removes an exact match. Returns whether something was removed.
    pub(crate) fn unsubscribe(&mut self, event: &str, class: &str, method: &str) -> bool {
        let Some(entries) = self.events.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|s| !s.same_handler(class, method));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.events.remove(event);
        }
        removed
    }

    /// Every handler of `class`, across events.
    pub(crate) fn class_handlers(&self, class: &str) -> Vec<Subscription> {
        self.events
            .values()
            .flatten()
            .filter(|s| s.class == class)
            .cloned()
            .collect()
    }

    /// Removes the handlers of `class` that are not in `keep`. Returns how
    /// many were removed.
    pub(crate) fn retain_class(&mut self, class: &str, keep: &[Subscription]) -> usize {
        let mut removed = 0;
        for entries in self.events.values_mut() {
            let before = entries.len();
            entries.retain(|s| {
                s.class != class
                    || keep
                        .iter()
                        .any(|k| k.event == s.event && k.method == s.method)
            });
            removed += before - entries.len();
        }
        self.events.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Snapshot of the handlers of an event, in dispatch order.
    pub(crate) fn handlers(&self, event: &str) -> Vec<Subscription> {
        self.events.get(event).cloned().unwrap_or_default()
    }

    /// Number of handlers for an event.
    pub(crate) fn count(&self, event: &str) -> usize {
        self.events.get(event).map(Vec::len).unwrap_or(0)
    }

    /// All events with at least one handler, sorted.
    pub(crate) fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }
}
