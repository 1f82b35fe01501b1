//! Greeting handlers used as smoke-test endpoints.

use serde_json::{json, Value};

use crate::auth::ClaimsContext;
use crate::routing::{HandlerResponse, Payload};

/// Echo the caller's claims and payload with a greeting.
pub fn hello(ctx: &ClaimsContext, data: &Payload) -> HandlerResponse {
    greet(ctx, data, "Hello, world!")
}

/// Same as [`hello`], mounted on a credential-protected route.
pub fn goodbye(ctx: &ClaimsContext, data: &Payload) -> HandlerResponse {
    greet(ctx, data, "Goodbye, world!")
}

fn greet(ctx: &ClaimsContext, data: &Payload, greeting: &str) -> HandlerResponse {
    HandlerResponse::ok(
        "OK",
        json!({
            "ctx": ctx,
            "data": Value::Object(data.clone()),
            "message": greeting,
        }),
    )
}
