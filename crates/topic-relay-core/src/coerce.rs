use crate::error::{RelayError, Result};
use crate::expr;
use serde_json::Value;

pub const INT_MARKER: &str = "INT:";
pub const DICT_MARKER: &str = "DICT:";
pub const EVAL_MARKER: &str = "EVAL:";

/// Turn a substituted template string into its final value according to its
/// typed prefix. Strings without a known prefix are returned unchanged.
pub fn coerce(field: &str, text: String) -> Result<Value> {
    if let Some(rest) = text.strip_prefix(INT_MARKER) {
        return rest
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| coercion(field, INT_MARKER, e.to_string()));
    }

    if let Some(rest) = text.strip_prefix(DICT_MARKER) {
        return match expr::evaluate(rest) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(coercion(
                field,
                DICT_MARKER,
                format!("expected a mapping literal, got {other}"),
            )),
            Err(e) => Err(coercion(field, DICT_MARKER, e.to_string())),
        };
    }

    if let Some(rest) = text.strip_prefix(EVAL_MARKER) {
        return expr::evaluate(rest);
    }

    Ok(Value::String(text))
}

fn coercion(field: &str, marker: &'static str, reason: String) -> RelayError {
    RelayError::Coercion {
        field: field.to_string(),
        marker,
        reason,
    }
}
