use crate::coerce::coerce;
use crate::error::{RelayError, Result};
use crate::template::{Sources, Template};
use crate::Entry;
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields tagged with this prefix are dropped instead of failing when a
/// placeholder cannot be resolved.
pub const OPTIONAL_MARKER: &str = "OPTIONAL:";

/// Build the outgoing body from a payload template.
///
/// String values are rendered against `sources` and then coerced by their
/// typed prefix; any other value is copied unchanged.
pub fn apply_payload_template(template: &BTreeMap<String, Value>, sources: &Sources) -> Result<Entry> {
    let mut out = Entry::new();
    for (field, raw) in template {
        let Value::String(raw) = raw else {
            out.insert(field.clone(), raw.clone());
            continue;
        };

        let (optional, raw) = match raw.strip_prefix(OPTIONAL_MARKER) {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };

        let rendered = match Template::parse(raw)?.render(sources) {
            Ok(text) => text,
            Err(RelayError::MissingField { field: missing, .. }) if optional => {
                tracing::debug!(%field, %missing, "optional field unresolved, omitting");
                continue;
            }
            Err(e) => return Err(e),
        };
        out.insert(field.clone(), coerce(field, rendered)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn renders_each_field() {
        let payload = json!({"id": 3, "company_name": "mycompany"});
        let groups = json!({"object": "child"});
        let sources = Sources::new()
            .with("_topic_groups", &groups)
            .with("payload", &payload);
        let out = apply_payload_template(
            &template(json!({
                "parent": "{payload[id]}",
                "kind": "{_topic_groups[object]}",
                "status": "created",
            })),
            &sources,
        )
        .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"parent": "3", "kind": "child", "status": "created"})
        );
    }

    #[test]
    fn optional_missing_field_is_omitted() {
        let payload = json!({"id": 1});
        let sources = Sources::new().with("payload", &payload);
        let out = apply_payload_template(
            &template(json!({
                "id": "{payload[id]}",
                "extra": "OPTIONAL:{payload[not_there]}",
            })),
            &sources,
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"id": "1"}));
    }

    #[test]
    fn required_missing_field_fails() {
        let payload = json!({"id": 1});
        let sources = Sources::new().with("payload", &payload);
        let err = apply_payload_template(&template(json!({"extra": "{payload[not_there]}"})), &sources)
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingField { ref field, .. } if field == "payload[not_there]"));
    }

    #[test]
    fn optional_present_field_is_kept_and_coerced() {
        let payload = json!({"count": "12"});
        let sources = Sources::new().with("payload", &payload);
        let out = apply_payload_template(
            &template(json!({"count": "OPTIONAL:INT:{payload[count]}"})),
            &sources,
        )
        .unwrap();
        assert_eq!(out["count"], 12);
    }

    #[test]
    fn typed_prefixes_apply_after_substitution() {
        let payload = json!({"n": 4, "name": "x"});
        let sources = Sources::new().with("payload", &payload);
        let out = apply_payload_template(
            &template(json!({
                "int": "INT:{payload[n]}",
                "dict": "DICT:{{'name': '{payload[name]}', 'n': {payload[n]}}}",
                "eval": "EVAL:{payload[n]} * 2 + 1",
            })),
            &sources,
        )
        .unwrap();
        assert_eq!(out["int"], 4);
        assert_eq!(out["dict"], json!({"name": "x", "n": 4}));
        assert_eq!(out["eval"], 9);
    }

    #[test]
    fn non_string_values_pass_through() {
        let out = apply_payload_template(
            &template(json!({"n": 5, "flag": true, "nested": {"a": [1, 2]}})),
            &Sources::new(),
        )
        .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"n": 5, "flag": true, "nested": {"a": [1, 2]}})
        );
    }

    #[test]
    fn coercion_failure_is_reported() {
        let payload = json!({"n": "abc"});
        let sources = Sources::new().with("payload", &payload);
        assert!(matches!(
            apply_payload_template(&template(json!({"n": "INT:{payload[n]}"})), &sources),
            Err(RelayError::Coercion { .. })
        ));
    }

    #[test]
    fn hostile_payload_values_fail_the_expression() {
        let payload = json!({"n": i64::MAX, "expr": format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000))});
        let sources = Sources::new().with("payload", &payload);
        assert!(matches!(
            apply_payload_template(&template(json!({"bar": "EVAL:'-' * {payload[n]}"})), &sources),
            Err(RelayError::Expression(_))
        ));
        assert!(matches!(
            apply_payload_template(&template(json!({"bar": "EVAL:{payload[expr]}"})), &sources),
            Err(RelayError::Expression(_))
        ));
    }
}
