//! Custom handlers addressed as `plugin.function`.
//!
//! Loading plugins is left to the embedding program; it registers the
//! callables it found and actions refer to them by name.

use crate::error::{RelayError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub trait CustomHandler: Send + Sync {
    /// `action` is the action definition plus its `name` and `message_topic`.
    fn call(&self, action: &Value, topic: &str, payload: &Value) -> HandlerResult;
}

impl<F> CustomHandler for F
where
    F: Fn(&Value, &str, &Value) -> HandlerResult + Send + Sync,
{
    fn call(&self, action: &Value, topic: &str, payload: &Value) -> HandlerResult {
        self(action, topic, payload)
    }
}

/// A handler resolved by name, ready to be bound into a runnable action.
#[derive(Clone)]
pub struct NamedHandler {
    pub name: String,
    pub handler: Arc<dyn CustomHandler>,
}

impl fmt::Debug for NamedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedHandler").field("name", &self.name).finish()
    }
}

impl NamedHandler {
    pub fn call(&self, action: &Value, topic: &str, payload: &Value) -> Result<()> {
        self.handler
            .call(action, topic, payload)
            .map_err(|source| RelayError::Handler {
                name: self.name.clone(),
                source,
            })
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    plugins: HashMap<String, HashMap<String, Arc<dyn CustomHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        plugin: impl Into<String>,
        function: impl Into<String>,
        handler: impl CustomHandler + 'static,
    ) -> &mut Self {
        self.plugins
            .entry(plugin.into())
            .or_default()
            .insert(function.into(), Arc::new(handler));
        self
    }

    /// Look up `plugin.function`.
    pub fn resolve(&self, name: &str) -> Result<NamedHandler> {
        let unresolved = || RelayError::UnresolvedCustomHandler(name.to_string());
        if !crate::config::is_handler_name(name) {
            return Err(unresolved());
        }
        let (plugin, function) = name.split_once('.').ok_or_else(unresolved)?;
        let handler = self
            .plugins
            .get(plugin)
            .and_then(|functions| functions.get(function))
            .ok_or_else(unresolved)?;
        Ok(NamedHandler {
            name: name.to_string(),
            handler: Arc::clone(handler),
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .iter()
            .flat_map(|(plugin, functions)| functions.keys().map(move |f| format!("{plugin}.{f}")))
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
