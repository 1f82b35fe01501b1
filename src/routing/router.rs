//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Resolve `(path, method)` to handler metadata
//! - Distinguish "no such path" from "path exists, wrong method"
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - Exact path match, upper-cased method
//! - Every handler id is checked against the registry at build time

use std::collections::HashMap;

use thiserror::Error;

use crate::config::RouteConfig;
use crate::routing::registry::HandlerRegistry;

/// Handler metadata for one `(path, method)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub handler_id: String,
    pub credential_required: bool,
    pub role_required: bool,
}

/// Outcome of a route lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Found(&'a RouteEntry),
    /// The path is known but not for this method.
    MethodNotAllowed,
    NotFound,
}

/// Errors raised while building a route table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("duplicate route {method} {path}")]
    Duplicate { method: String, path: String },

    #[error("route {method} {path} refers to unknown handler '{handler}'")]
    UnknownHandler {
        method: String,
        path: String,
        handler: String,
    },
}

/// Immutable mapping from path and method to handler metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: HashMap<String, HashMap<String, RouteEntry>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Build a table from descriptors, validating handler ids.
    pub fn from_descriptors(
        descriptors: &[RouteConfig],
        registry: &HandlerRegistry,
    ) -> Result<Self, RouteTableError> {
        descriptors
            .iter()
            .cloned()
            .fold(Self::builder(), RouteTableBuilder::route)
            .build(registry)
    }

    /// Resolve a request against the table.
    pub fn resolve(&self, path: &str, method: &str) -> Resolution<'_> {
        let Some(methods) = self.routes.get(path) else {
            return Resolution::NotFound;
        };
        match methods.get(&method.to_ascii_uppercase()) {
            Some(entry) => Resolution::Found(entry),
            None => Resolution::MethodNotAllowed,
        }
    }

    /// Number of `(path, method)` pairs.
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Collects route descriptors; `build` freezes them into a [`RouteTable`].
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    descriptors: Vec<RouteConfig>,
}

impl RouteTableBuilder {
    pub fn route(mut self, descriptor: RouteConfig) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self, registry: &HandlerRegistry) -> Result<RouteTable, RouteTableError> {
        let mut routes: HashMap<String, HashMap<String, RouteEntry>> = HashMap::new();

        for descriptor in self.descriptors {
            let method = descriptor.method.to_ascii_uppercase();
            if !registry.contains(&descriptor.handler) {
                return Err(RouteTableError::UnknownHandler {
                    method,
                    path: descriptor.path,
                    handler: descriptor.handler,
                });
            }

            let methods = routes.entry(descriptor.path.clone()).or_default();
            if methods.contains_key(&method) {
                return Err(RouteTableError::Duplicate {
                    method,
                    path: descriptor.path,
                });
            }
            methods.insert(
                method,
                RouteEntry {
                    handler_id: descriptor.handler,
                    credential_required: descriptor.credential_required,
                    role_required: descriptor.role_required,
                },
            );
        }

        Ok(RouteTable { routes })
    }
}
