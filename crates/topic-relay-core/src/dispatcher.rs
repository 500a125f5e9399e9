//! Topic → action resolution and hydration.
//!
//! A [`Dispatcher`] owns everything that is fixed after load (config, compiled
//! topic patterns, handlers, HTTP client) and turns a `(topic, payload)` pair
//! into the runnable actions it triggers.

use crate::accumulator::{Accumulator, CONFIG_KEY, PAYLOAD_KEY};
use crate::config::{ActionDef, RelayConfig};
use crate::data_map::apply_data_map;
use crate::error::{RelayError, Result};
use crate::handlers::HandlerRegistry;
use crate::http::HttpClient;
use crate::matcher::{TopicGroup, TopicMatcher};
use crate::payload::apply_payload_template;
use crate::runnable::RunnableAction;
use crate::template::{join_url, Sources, Template};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct Dispatcher {
    config: Arc<RelayConfig>,
    config_value: Value,
    matcher: TopicMatcher,
    http: Arc<dyn HttpClient>,
    handlers: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// Build the dispatcher. Static topic patterns are compiled here, so an
    /// invalid one fails construction.
    pub fn new(
        config: Arc<RelayConfig>,
        http: Arc<dyn HttpClient>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self> {
        let matcher = TopicMatcher::new(&config.actions)?;
        let config_value = config.settings.to_value();
        Ok(Self {
            config,
            config_value,
            matcher,
            http,
            handlers,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Every action triggered by `topic`, hydrated lazily.
    ///
    /// An error expanding one topic group or hydrating one action is yielded
    /// in its place; iteration goes on with the next group or action.
    pub fn actions_for_topic<'a>(&'a self, topic: &'a str, payload: &'a Value) -> TopicActions<'a> {
        TopicActions {
            dispatcher: self,
            topic,
            payload,
            groups: self.matcher.groups().iter(),
            current: None,
            last: None,
        }
    }

    /// Hydrate one action for an already matched topic.
    pub fn hydrate_action(
        &self,
        name: &str,
        action: &ActionDef,
        topic: &str,
        topic_groups: &Map<String, Value>,
        payload: &Value,
    ) -> Result<RunnableAction> {
        if !action.custom_handlers.is_empty() {
            let handlers = action
                .custom_handlers
                .iter()
                .map(|handler| self.handlers.resolve(handler))
                .collect::<Result<Vec<_>>>()?;
            return Ok(RunnableAction::CustomHandlers {
                handlers,
                action: action_value(name, action, topic),
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }

        let Some(endpoint) = &action.endpoint else {
            return Err(RelayError::ActionWithoutTarget(name.to_string()));
        };
        let method = action
            .method
            .ok_or_else(|| RelayError::MissingMethod(name.to_string()))?;

        let topic_value = Value::String(topic.to_string());
        let groups_value = Value::Object(topic_groups.clone());
        let url = Template::parse(&join_url(&self.config.settings.base_url, endpoint))?.render(
            &Sources::new()
                .with(CONFIG_KEY, &self.config_value)
                .with(PAYLOAD_KEY, payload)
                .with("topic", &topic_value)
                .with("_topic", &topic_value)
                .with("_topic_groups", &groups_value),
        )?;

        let entries = Accumulator::new(
            self.http.as_ref(),
            &self.config.settings.base_url,
            &self.config_value,
        )
        .run(payload, &action.accumulators)?;

        let entries = match &action.payload {
            Some(template) => {
                let action_value = action_value(name, action, topic);
                let fixed = Sources::new()
                    .with("_topic", &topic_value)
                    .with("_topic_groups", &groups_value)
                    .with("_action", &action_value)
                    .with(CONFIG_KEY, &self.config_value);
                entries
                    .iter()
                    .filter(|entry| !entry.is_empty())
                    .map(|entry| apply_payload_template(template, &fixed.clone().with_entry(entry)))
                    .collect::<Result<Vec<_>>>()?
            }
            None => entries,
        };

        let entries = entries
            .iter()
            .map(|entry| apply_data_map(entry, &action.data_map))
            .collect();

        tracing::debug!(action = name, %method, %url, "action hydrated");
        Ok(RunnableAction::Endpoint {
            method,
            url,
            entries,
        })
    }

    fn match_group(&self, group: &TopicGroup, topic: &str, payload: &Value) -> Result<Option<Map<String, Value>>> {
        let sources = Sources::new()
            .with(CONFIG_KEY, &self.config_value)
            .with(PAYLOAD_KEY, payload);
        group.match_topic(topic, &sources)
    }
}

/// The action definition as handlers and templates see it.
fn action_value(name: &str, action: &ActionDef, topic: &str) -> Value {
    let mut value = serde_json::to_value(action).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Value::Object(map) = &mut value {
        map.insert("name".to_string(), Value::String(name.to_string()));
        map.insert("message_topic".to_string(), Value::String(topic.to_string()));
    }
    value
}

// ---------------------------------------------------------------------------
// TopicActions
// ---------------------------------------------------------------------------

/// Iterator returned by [`Dispatcher::actions_for_topic`].
pub struct TopicActions<'a> {
    dispatcher: &'a Dispatcher,
    topic: &'a str,
    payload: &'a Value,
    groups: std::slice::Iter<'a, TopicGroup>,
    current: Option<(Map<String, Value>, std::slice::Iter<'a, String>)>,
    last: Option<&'a str>,
}

impl<'a> TopicActions<'a> {
    /// Name of the action behind the most recent item; `None` when that item
    /// was a topic group failing to expand.
    pub fn last_action(&self) -> Option<&'a str> {
        self.last
    }
}

impl Iterator for TopicActions<'_> {
    type Item = Result<(String, RunnableAction)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((topic_groups, names)) = &mut self.current {
                if let Some(name) = names.next() {
                    self.last = Some(name.as_str());
                    let item = match self.dispatcher.config.actions.get(name) {
                        Some(action) => self
                            .dispatcher
                            .hydrate_action(name, action, self.topic, topic_groups, self.payload)
                            .map(|runnable| (name.clone(), runnable)),
                        None => Err(RelayError::InvalidConfig(format!("unknown action '{name}'"))),
                    };
                    return Some(item);
                }
                self.current = None;
            }

            let group = self.groups.next()?;
            match self.dispatcher.match_group(group, self.topic, self.payload) {
                Ok(Some(topic_groups)) => {
                    tracing::debug!(topic = self.topic, pattern = group.pattern(), "topic matched");
                    self.current = Some((topic_groups, group.actions().iter()));
                }
                Ok(None) => {}
                Err(e) => {
                    self.last = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
