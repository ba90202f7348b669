//! `DebugLog`: collects log messages and renders them into the page
//! outside production.

use std::sync::{Arc, Mutex, PoisonError};

use spcms_plugin::prelude::*;

use crate::filters::text::escape;

/// Canonical plugin name.
pub const NAME: &str = "DebugLog";

/// Event collecting a message.
pub const ADD_MESSAGE_EVENT: &str = "sandbox.add_log_message";

const STYLES: &str = r#"<style type="text/css">
#SPCMS_DebugLog { position:fixed; left:1em; top:0; background:#000; color:#fff; padding:0.5em; font-family:monospace; border:3px double #fff; border-top-style:none; }
#SPCMS_DebugLog:hover { overflow:auto; right:1em; bottom:1em; }
#SPCMS_DebugLog pre { display:none; }
#SPCMS_DebugLog:hover pre { display:block; }
</style>
"#;

/// Collects messages published on `sandbox.add_log_message`.
#[derive(Debug, Default)]
pub struct DebugLog {
    production: bool,
    messages: Mutex<Vec<Value>>,
}

impl DebugLog {
    /// Factory registered with the plugin loader.
    pub fn create(ctx: PluginContext) -> AppResult<Arc<dyn Plugin>> {
        Ok(Arc::new(Self::new(ctx.env.production)))
    }

    /// Creates an empty log.
    pub fn new(production: bool) -> Self {
        Self {
            production,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Messages collected so far.
    pub fn messages(&self) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn output(&self) -> AppResult<String> {
        let messages = self.messages();
        if messages.is_empty() {
            return Ok(String::new());
        }
        let dump = serde_json::to_string_pretty(&messages)?;
        Ok(format!(
            "<div id=\"SPCMS_DebugLog\"><strong>DEBUGINFO</strong>\n<pre>{}</pre>\n</div>\n",
            escape(&dump)
        ))
    }
}

impl Plugin for DebugLog {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, bus: &EventBus) -> AppResult<()> {
        bus.register(ADD_MESSAGE_EVENT, NAME, "add_message");
        if !self.production {
            bus.register("sandbox.template_head_end", NAME, "styles");
            bus.register("sandbox.template_body_end", NAME, "output");
        }
        Ok(())
    }

    fn call(&self, method: &str, arg: &mut Value, _bus: &EventBus) -> AppResult<Value> {
        match method {
            "add_message" => {
                self.messages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(arg.clone());
                Ok(Value::Null)
            }
            "styles" => Ok(Value::from(STYLES)),
            "output" => self.output().map(Value::from),
            _ => Err(unknown_method(NAME, method)),
        }
    }
}
