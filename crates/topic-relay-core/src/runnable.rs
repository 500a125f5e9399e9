use crate::accumulator::PAYLOAD_KEY;
use crate::config::Method;
use crate::error::Result;
use crate::handlers::NamedHandler;
use crate::http::HttpClient;
use crate::Entry;
use serde_json::{json, Value};

/// A fully hydrated action, ready to run.
#[derive(Debug, Clone)]
pub enum RunnableAction {
    /// One request per entry, all to the same URL.
    Endpoint {
        method: Method,
        url: String,
        entries: Vec<Entry>,
    },
    /// Handlers called in declared order with the action, topic and payload.
    CustomHandlers {
        handlers: Vec<NamedHandler>,
        action: Value,
        topic: String,
        payload: Value,
    },
}

/// The JSON body sent for an entry: the bare payload when that is all the
/// entry holds, the whole entry otherwise.
pub fn request_body(entry: &Entry) -> Value {
    match entry.get(PAYLOAD_KEY) {
        Some(payload) if entry.len() == 1 => payload.clone(),
        _ => Value::Object(entry.clone()),
    }
}

impl RunnableAction {
    pub fn execute(&self, http: &dyn HttpClient) -> Result<()> {
        match self {
            RunnableAction::Endpoint {
                method,
                url,
                entries,
            } => {
                for entry in entries {
                    http.send(*method, url, Some(&request_body(entry)))?;
                }
            }
            RunnableAction::CustomHandlers {
                handlers,
                action,
                topic,
                payload,
            } => {
                for handler in handlers {
                    tracing::debug!(handler = %handler.name, %topic, "calling custom handler");
                    handler.call(action, topic, payload)?;
                }
            }
        }
        Ok(())
    }

    /// JSON view of what `execute` would do.
    pub fn describe(&self) -> Value {
        match self {
            RunnableAction::Endpoint {
                method,
                url,
                entries,
            } => json!({
                "kind": "endpoint",
                "method": method.as_str(),
                "url": url,
                "requests": entries.iter().map(request_body).collect::<Vec<_>>(),
            }),
            RunnableAction::CustomHandlers {
                handlers, topic, ..
            } => json!({
                "kind": "custom_handlers",
                "handlers": handlers.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
                "topic": topic,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerRegistry, HandlerResult};
    use crate::testing::FakeHttp;
    use std::sync::{Arc, Mutex};

    fn entry(value: Value) -> Entry {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn body_is_bare_payload_for_single_key_entries() {
        assert_eq!(request_body(&entry(json!({"payload": {"id": 1}}))), json!({"id": 1}));
        assert_eq!(
            request_body(&entry(json!({"payload": {"id": 1}, "alfa": 2}))),
            json!({"payload": {"id": 1}, "alfa": 2})
        );
        assert_eq!(request_body(&entry(json!({"status": "x"}))), json!({"status": "x"}));
    }

    #[test]
    fn endpoint_sends_one_request_per_entry() {
        let http = FakeHttp::new();
        let action = RunnableAction::Endpoint {
            method: Method::Post,
            url: "https://api.example.com/stati/".into(),
            entries: vec![entry(json!({"n": 1})), entry(json!({"n": 2}))],
        };
        action.execute(&http).unwrap();

        let calls = http.calls_with(Method::Post);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].body, Some(json!({"n": 2})));
    }

    #[test]
    fn endpoint_stops_on_failure() {
        let http = FakeHttp::new().with_status("https://api.example.com/x", 500);
        let action = RunnableAction::Endpoint {
            method: Method::Put,
            url: "https://api.example.com/x".into(),
            entries: vec![entry(json!({"n": 1})), entry(json!({"n": 2}))],
        };
        assert!(action.execute(&http).is_err());
        assert_eq!(http.calls().len(), 1);
    }

    #[test]
    fn handlers_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for function in ["one", "two"] {
            let sink = Arc::clone(&seen);
            registry.register("p", function, move |action: &Value, topic: &str, _: &Value| -> HandlerResult {
                sink.lock().unwrap().push(format!("{function}:{topic}:{}", action["name"]));
                Ok(())
            });
        }
        let action = RunnableAction::CustomHandlers {
            handlers: vec![registry.resolve("p.two").unwrap(), registry.resolve("p.one").unwrap()],
            action: json!({"name": "a"}),
            topic: "t".into(),
            payload: json!({}),
        };
        action.execute(&FakeHttp::new()).unwrap();
        assert_eq!(*seen.lock().unwrap(), ["two:t:\"a\"", "one:t:\"a\""]);
        assert_eq!(action.describe()["handlers"], json!(["p.two", "p.one"]));
    }
}
