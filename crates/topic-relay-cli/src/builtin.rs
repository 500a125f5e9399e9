//! Handlers available to every config under the `builtin` plugin name.

use serde_json::{json, Value};
use topic_relay_core::{HandlerRegistry, HandlerResult};

pub const PLUGIN: &str = "builtin";

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(PLUGIN, "log", log)
        .register(PLUGIN, "print", print);
    registry
}

/// Emit the message as a tracing event.
fn log(action: &Value, topic: &str, payload: &Value) -> HandlerResult {
    let name = action["name"].as_str().unwrap_or_default();
    tracing::info!(action = name, topic, payload = %payload, "message received");
    Ok(())
}

/// Write the message as one JSON line on stdout.
fn print(action: &Value, topic: &str, payload: &Value) -> HandlerResult {
    let line = json!({
        "action": action["name"],
        "topic": topic,
        "payload": payload,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}
