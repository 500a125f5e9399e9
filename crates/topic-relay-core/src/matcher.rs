//! Topic patterns and the actions grouped under them.

use crate::config::ActionTable;
use crate::error::{RelayError, Result};
use crate::template::{Sources, Template};
use regex::Regex;
use serde_json::{Map, Value};

/// Actions sharing one raw topic pattern.
#[derive(Debug, Clone)]
pub struct TopicGroup {
    pattern: String,
    template: Template,
    /// Compiled once when the pattern has no placeholders.
    compiled: Option<Regex>,
    actions: Vec<String>,
}

fn compile(pattern: &str, expanded: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{expanded})")).map_err(|e| RelayError::InvalidTopicPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl TopicGroup {
    fn new(pattern: &str) -> Result<Self> {
        let template = Template::parse(pattern).map_err(|e| RelayError::InvalidTopicPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let compiled = if template.is_static() {
            Some(compile(pattern, &template.render(&Sources::new())?)?)
        } else {
            None
        };
        Ok(Self {
            pattern: pattern.to_string(),
            template,
            compiled,
            actions: Vec::new(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Action names in declaration order.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Expand the pattern against `sources` and match it at the start of
    /// `topic`. Returns the named groups on a match; groups that did not
    /// participate are `null`.
    pub fn match_topic(&self, topic: &str, sources: &Sources) -> Result<Option<Map<String, Value>>> {
        let dynamic;
        let regex = match &self.compiled {
            Some(regex) => regex,
            None => {
                dynamic = compile(&self.pattern, &self.template.render(sources)?)?;
                &dynamic
            }
        };

        let Some(captures) = regex.captures(topic) else {
            return Ok(None);
        };
        let groups = regex
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures
                    .name(name)
                    .map_or(Value::Null, |m| Value::String(m.as_str().to_string()));
                (name.to_string(), value)
            })
            .collect();
        Ok(Some(groups))
    }
}

/// All topic groups, in order of first declaration.
#[derive(Debug, Clone, Default)]
pub struct TopicMatcher {
    groups: Vec<TopicGroup>,
}

impl TopicMatcher {
    pub fn new(actions: &ActionTable) -> Result<Self> {
        let mut groups: Vec<TopicGroup> = Vec::new();
        for (name, action) in actions.iter() {
            let index = match groups.iter().position(|g| g.pattern == action.topic) {
                Some(index) => index,
                None => {
                    groups.push(TopicGroup::new(&action.topic)?);
                    groups.len() - 1
                }
            };
            groups[index].actions.push(name.to_string());
        }
        tracing::debug!(groups = groups.len(), "topic matcher built");
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[TopicGroup] {
        &self.groups
    }
}
