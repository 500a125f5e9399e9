use crate::config::AccumulatorStep;
use crate::error::{RelayError, Result};
use crate::http::HttpClient;
use crate::template::{join_url, Sources, Template};
use crate::Entry;
use serde_json::Value;

/// Level name the message payload is stored under.
pub const PAYLOAD_KEY: &str = "payload";

/// Source name of the settings inside URL templates.
pub const CONFIG_KEY: &str = "config";

pub fn base_entry(payload: &Value) -> Entry {
    let mut entry = Entry::new();
    entry.insert(PAYLOAD_KEY.to_string(), payload.clone());
    entry
}

/// Items a GET response fans out into: the `results` list of a paginated
/// response, or the response itself.
pub fn fan_out(response: Value) -> Vec<Value> {
    if let Value::Object(map) = &response {
        if let Some(Value::Array(items)) = map.get("results") {
            return items.clone();
        }
    }
    vec![response]
}

/// Staged GET fan-out. Each step turns every entry of the current level into
/// one new entry per fetched item.
pub struct Accumulator<'a> {
    http: &'a dyn HttpClient,
    base_url: &'a str,
    config: &'a Value,
}

impl<'a> Accumulator<'a> {
    pub fn new(http: &'a dyn HttpClient, base_url: &'a str, config: &'a Value) -> Self {
        Self {
            http,
            base_url,
            config,
        }
    }

    pub fn run(&self, payload: &Value, steps: &[AccumulatorStep]) -> Result<Vec<Entry>> {
        let mut level = vec![base_entry(payload)];

        for step in steps {
            let template = Template::parse(&step.url)?;
            let mut next = Vec::new();

            for entry in &level {
                let url = self.step_url(step, &template, entry)?;
                tracing::debug!(step = %step.name, %url, "accumulating");

                let items = fan_out(self.http.get_json(&url)?);
                for item in items {
                    let mut grown = Entry::new();
                    grown.insert(step.name.clone(), item);
                    for (key, value) in entry {
                        grown.insert(key.clone(), value.clone());
                    }
                    next.push(grown);
                }
            }

            tracing::debug!(step = %step.name, entries = next.len(), "accumulation level done");
            level = next;
        }

        Ok(level)
    }

    fn step_url(&self, step: &AccumulatorStep, template: &Template, entry: &Entry) -> Result<String> {
        let from_entry = template.render_partial(&Sources::new().with_entry(entry))?;
        let joined = Template::parse(&join_url(self.base_url, &from_entry))?;

        let sources = Sources::new()
            .with_entry(entry)
            .with(CONFIG_KEY, self.config);
        if let Some(unknown) = joined.fields().find(|f| !sources.contains(f.root())) {
            return Err(RelayError::UnknownAccumulatorKey {
                step: step.name.clone(),
                key: unknown.root().to_string(),
            });
        }
        joined.render(&sources)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
