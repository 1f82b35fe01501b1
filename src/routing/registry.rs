//! Handler registry.
//!
//! Handlers are registered explicitly by id at startup. The registry is
//! immutable afterwards and shared by reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::ClaimsContext;

/// Decoded request payload handed to a handler.
pub type Payload = Map<String, Value>;

/// Structured result of a handler: status code, status message, JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub code: u16,
    pub message: String,
    pub body: Value,
}

impl HandlerResponse {
    /// A 200 response carrying `body`.
    pub fn ok(message: impl Into<String>, body: Value) -> Self {
        Self {
            code: 200,
            message: message.into(),
            body,
        }
    }

    /// An error response with an `{"error": message}` body.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            body: serde_json::json!({ "error": message }),
            message,
        }
    }
}

/// A request handler. Runs synchronously on the worker's event loop.
pub type Handler = Arc<dyn Fn(&ClaimsContext, &Payload) -> HandlerResponse + Send + Sync>;

/// Immutable map from handler id to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Start an explicit registration.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Look up a handler by id.
    pub fn get(&self, id: &str) -> Option<&Handler> {
        self.handlers.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.ids())
            .finish()
    }
}

/// Builder collecting handlers before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` under `id`. A later registration with the same id
    /// replaces the earlier one.
    pub fn register<F>(mut self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ClaimsContext, &Payload) -> HandlerResponse + Send + Sync + 'static,
    {
        let id = id.into();
        if self.handlers.insert(id.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(handler = %id, "Handler registered twice; keeping the last one");
        }
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
