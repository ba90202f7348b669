//! Event dispatch: runs every handler of an event in order and collects
//! one outcome per handler.
//!
//! - Handlers run in subscription order, against a snapshot taken when the
//!   dispatch starts.
//! - All handlers share one mutable argument.
//! - A failing handler is recorded and the next one runs, unless the bus is
//!   strict, in which case the error aborts the dispatch.

use serde_json::Value;
use tracing::{debug, error, warn};

use spcms_core::{AppError, AppResult};

use super::EventBus;

/// Outcome of one handler.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// `Class::method`.
    pub key: String,
    /// Return value, or the error the handler (or its resolution) raised.
    pub result: AppResult<Value>,
}

/// Aggregated outcomes of one dispatch, in handler order.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Individual handler outcomes.
    pub results: Vec<HandlerOutcome>,
}

impl DispatchResult {
    /// Whether no handler ran.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of handlers that ran.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Outcome recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&AppResult<Value>> {
        self.results
            .iter()
            .find(|outcome| outcome.key == key)
            .map(|outcome| &outcome.result)
    }

    /// Whether a handler with `key` ran.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Handler keys in execution order.
    pub fn keys(&self) -> Vec<&str> {
        self.results.iter().map(|o| o.key.as_str()).collect()
    }

    /// Failed handlers with their errors.
    pub fn failures(&self) -> Vec<(&str, &AppError)> {
        self.results
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.key.as_str(), e)))
            .collect()
    }

    /// Concatenation of every string result, in handler order.
    pub fn text(&self) -> String {
        self.results
            .iter()
            .filter_map(|o| match &o.result {
                Ok(Value::String(s)) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventBus {
    /// Dispatches `event` to its handlers with a shared mutable argument.
    ///
    /// Handlers are resolved through the loader when their turn comes, so
    /// a plugin that cannot be loaded fails only its own entries.
    pub fn dispatch(&self, event: &str, arg: &mut Value) -> AppResult<DispatchResult> {
        let handlers = self.handlers(event);
        let mut result = DispatchResult::default();

        if handlers.is_empty() {
            return Ok(result);
        }

        debug!(event, handler_count = handlers.len(), "Dispatching event");

        for subscription in &handlers {
            let key = subscription.key();
            let outcome = self
                .load(&subscription.source)
                .and_then(|plugin| plugin.call(&subscription.method, arg, self));

            let outcome = match outcome {
                Err(e) if self.is_strict() => {
                    error!(event, handler = %key, error = %e, "Handler failed, aborting dispatch");
                    return Err(e);
                }
                Err(e) => {
                    warn!(event, handler = %key, error = %e, "Handler failed");
                    Err(e)
                }
                ok => ok,
            };

            result.results.push(HandlerOutcome {
                key,
                result: outcome,
            });
        }

        Ok(result)
    }

    /// Dispatches `event` with a `null` argument.
    pub fn publish(&self, event: &str) -> AppResult<DispatchResult> {
        let mut arg = Value::Null;
        self.dispatch(event, &mut arg)
    }
}
