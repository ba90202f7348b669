//! `LanguageChecker`: negotiates content languages from the request's
//! `Accept-Language` value and the enabled languages.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use spcms_core::AppResult;
use spcms_plugin::{EventBus, Plugin, PluginContext, unknown_method};

/// Canonical plugin name.
pub const NAME: &str = "LanguageChecker";

/// Runtime attribute holding the raw `Accept-Language` value.
pub const ACCEPT_LANGUAGE: &str = "accept_language";

#[derive(Debug, Default, Deserialize)]
struct LanguageConfig {
    #[serde(default)]
    enabled: Vec<String>,
}

/// Requested and enabled languages of one request.
#[derive(Debug, Clone, Default)]
pub struct LanguageChecker {
    preferences: Vec<String>,
    stack: Vec<String>,
}

impl LanguageChecker {
    /// Factory registered with the plugin loader.
    pub fn create(ctx: PluginContext) -> AppResult<Arc<dyn Plugin>> {
        let config: LanguageConfig = if ctx.config.is_null() {
            LanguageConfig::default()
        } else {
            serde_json::from_value(ctx.config)?
        };
        let header = ctx.env.attribute(ACCEPT_LANGUAGE).unwrap_or_default();
        Ok(Arc::new(Self::new(header, &config.enabled)))
    }

    /// Negotiates from a raw `Accept-Language` value.
    pub fn new(accept_language: &str, enabled: &[String]) -> Self {
        let preferences = extend_codes(&requested_languages(accept_language));

        let mut stack: Vec<String> = preferences
            .iter()
            .filter(|code| enabled.contains(code))
            .cloned()
            .collect();
        for code in enabled {
            if !stack.contains(code) {
                stack.push(code.clone());
            }
        }

        debug!(?preferences, ?stack, "Languages negotiated");
        Self { preferences, stack }
    }

    /// Requested languages, best first, with alternative spellings.
    pub fn user_preferences(&self) -> &[String] {
        &self.preferences
    }

    /// Enabled languages, the requested ones first.
    pub fn language_stack(&self) -> &[String] {
        &self.stack
    }
}

impl Plugin for LanguageChecker {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, bus: &EventBus) -> AppResult<()> {
        bus.register("i18n.user_preferences", NAME, "user_preferences");
        bus.register("i18n.language_stack", NAME, "language_stack");
        Ok(())
    }

    fn call(&self, method: &str, arg: &mut Value, _bus: &EventBus) -> AppResult<Value> {
        let list = match method {
            "user_preferences" => self.user_preferences(),
            "language_stack" => self.language_stack(),
            _ => return Err(unknown_method(NAME, method)),
        };
        let value = Value::from(list.to_vec());
        *arg = value.clone();
        Ok(value)
    }
}

/// Language codes of an `Accept-Language` value ordered by quality.
/// Equal qualities keep their order; a repeated code keeps its first place.
fn requested_languages(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f64)> = Vec::new();

    for part in header.split(',') {
        let mut pieces = part.split(';');
        let code = pieces.next().unwrap_or_default().trim();
        if code.is_empty() {
            continue;
        }
        let quality = pieces
            .next()
            .and_then(|q| q.trim().strip_prefix("q="))
            .map(|q| q.trim().parse::<f64>().unwrap_or(0.0))
            .unwrap_or(1.0);

        match weighted.iter_mut().find(|(existing, _)| existing == code) {
            Some(entry) => entry.1 = quality,
            None => weighted.push((code.to_string(), quality)),
        }
    }

    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(code, _)| code).collect()
}

/// Adds alternative spellings: `en-us` brings `en_US` and `en`, `en_US`
/// brings `en-us` and `en`.
fn extend_codes(codes: &[String]) -> Vec<String> {
    let mut extended: Vec<String> = Vec::new();
    let mut push = |code: String| {
        if !extended.contains(&code) {
            extended.push(code);
        }
    };

    for code in codes {
        push(code.clone());

        let (Some(primary), Some(region)) = (code.get(..2), code.get(3..)) else {
            continue;
        };
        if region.is_empty() {
            continue;
        }
        match code.as_bytes()[2] {
            b'-' => push(format!("{primary}_{}", region.to_uppercase())),
            b'_' => push(format!("{primary}-{}", region.to_lowercase())),
            _ => {}
        }
        push(primary.to_string());
    }

    extended
}
