//! Built-in handlers and the default route set.
//!
//! Handler ids are `<group>.<name>`. Route descriptors in the config file
//! refer to these ids; when the config has no routes, [`default_routes`]
//! is used.

pub mod greeting;
pub mod light_belt;

use serde_json::json;

use crate::config::RouteConfig;
use crate::routing::{HandlerRegistry, HandlerResponse};

/// Registry with every built-in handler.
pub fn builtin_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register("greeting.hello", greeting::hello)
        .register("greeting.goodbye", greeting::goodbye)
        .register("light_belt.scenario", light_belt::scenario)
        .register("system.health", |_, _| {
            HandlerResponse::ok(
                "OK",
                json!({ "status": "healthy", "pid": std::process::id() }),
            )
        })
        .build()
}

/// Routes served when the config does not list any.
pub fn default_routes() -> Vec<RouteConfig> {
    [
        ("/hello", "GET", "greeting.hello", false),
        ("/goodbye", "POST", "greeting.goodbye", true),
        ("/light-belt/scenario", "POST", "light_belt.scenario", true),
        ("/health", "GET", "system.health", false),
    ]
    .into_iter()
    .map(|(path, method, handler, credential_required)| RouteConfig {
        path: path.to_string(),
        method: method.to_string(),
        handler: handler.to_string(),
        credential_required,
        role_required: false,
    })
    .collect()
}

/// Routes from the config, or the defaults when it lists none.
pub fn effective_routes(configured: &[RouteConfig]) -> Vec<RouteConfig> {
    if configured.is_empty() {
        default_routes()
    } else {
        configured.to_vec()
    }
}
