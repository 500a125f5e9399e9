//! Queue messages and the per-message handling loop.
//!
//! A message carries its topic in the `topic` attribute and its payload as a
//! JSON body, optionally wrapped in an SNS notification envelope. Handling
//! runs every triggered action in order and acknowledges (deletes) the
//! message only when none of them failed.

use crate::dispatcher::Dispatcher;
use crate::error::{RelayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Attribute holding the message topic.
pub const TOPIC_ATTRIBUTE: &str = "topic";

// ---------------------------------------------------------------------------
// QueueMessage
// ---------------------------------------------------------------------------

pub trait QueueMessage {
    fn message_id(&self) -> &str;

    fn body(&self) -> &str;

    /// String value of a message attribute.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// Acknowledge the message so the queue does not redeliver it.
    fn delete(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// LocalMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "StringValue", alias = "string_value", default)]
    pub string_value: Option<String>,
    #[serde(rename = "DataType", alias = "data_type", default = "default_data_type")]
    pub data_type: String,
}

fn default_data_type() -> String {
    "String".to_string()
}

/// A message read from a local source, shaped like an SQS receive result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMessage {
    #[serde(rename = "MessageId", alias = "message_id", default = "new_message_id")]
    pub message_id: String,
    /// A non-string body is kept as its JSON text.
    #[serde(rename = "Body", alias = "body", deserialize_with = "body_text")]
    pub body: String,
    #[serde(rename = "MessageAttributes", alias = "message_attributes", default)]
    pub attributes: BTreeMap<String, MessageAttribute>,
    #[serde(skip)]
    acknowledged: bool,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

fn body_text<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

impl LocalMessage {
    pub fn new(topic: impl Into<String>, payload: &Value) -> Self {
        let attribute = MessageAttribute {
            string_value: Some(topic.into()),
            data_type: default_data_type(),
        };
        Self {
            message_id: new_message_id(),
            body: payload.to_string(),
            attributes: BTreeMap::from([(TOPIC_ATTRIBUTE.to_string(), attribute)]),
            acknowledged: false,
        }
    }

    /// Parse one message from a line of JSON.
    pub fn from_json_str(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }
}

impl QueueMessage for LocalMessage {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)?.string_value.as_deref()
    }

    fn delete(&mut self) -> Result<()> {
        self.acknowledged = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

fn is_notification(map: &serde_json::Map<String, Value>) -> bool {
    matches!(map.get("Message"), Some(Value::String(_)))
        && (map.contains_key("Timestamp") || map.get("Type").and_then(Value::as_str) == Some("Notification"))
}

/// Decode a message body into its payload, unwrapping an SNS envelope.
pub fn parse_body(body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body)?;
    match &value {
        Value::Object(map) if is_notification(map) => {
            let inner = map.get("Message").and_then(Value::as_str).unwrap_or_default();
            Ok(serde_json::from_str(inner)?)
        }
        _ => Ok(value),
    }
}

/// Topic and payload of a message.
pub fn parse_message(message: &dyn QueueMessage) -> Result<(String, Value)> {
    let topic = message
        .attribute(TOPIC_ATTRIBUTE)
        .ok_or_else(|| RelayError::MissingTopicAttribute(message.message_id().to_string()))?
        .to_string();
    let payload = parse_body(message.body())?;
    Ok((topic, payload))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Lifecycle of one action while a message is handled.
///
/// Transitions: `Unmatched → Matched → Hydrated → Executed → Succeeded | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Unmatched,
    Matched,
    Hydrated,
    Executed,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    /// `None` when a topic pattern failed to expand before any action was
    /// identified.
    pub name: Option<String>,
    pub state: ActionState,
    /// Last stage reached before the final state.
    pub reached: ActionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

impl ActionReport {
    fn succeeded(name: String) -> Self {
        Self {
            name: Some(name),
            state: ActionState::Succeeded,
            reached: ActionState::Executed,
            error: None,
            response_body: None,
        }
    }

    fn failed(name: Option<String>, reached: ActionState, error: &RelayError) -> Self {
        Self {
            name,
            state: ActionState::Failed,
            reached,
            error: Some(error.to_string()),
            response_body: error.response_body().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReport {
    pub message_id: String,
    pub topic: String,
    pub actions: Vec<ActionReport>,
    pub deleted: bool,
    /// Set when every action succeeded but acknowledging the message failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_error: Option<String>,
    pub handled_at: DateTime<Utc>,
}

impl MessageReport {
    pub fn failed(&self) -> bool {
        self.actions.iter().any(|a| a.state == ActionState::Failed)
    }
}

// ---------------------------------------------------------------------------
// Handling
// ---------------------------------------------------------------------------

fn log_failure(report: &ActionReport, topic: &str) {
    let action = report.name.as_deref().unwrap_or("<topic pattern>");
    let error = report.error.as_deref().unwrap_or_default();
    match &report.response_body {
        Some(body) => tracing::error!(action, topic, error, response = %body, "action failed"),
        None => tracing::error!(action, topic, error, "action failed"),
    }
}

/// Run every action triggered by `message`, stopping at the first failure.
///
/// The message is deleted only when no action failed, which includes the
/// case where nothing matched. A failed delete is recorded in the report. An
/// `Err` means the message itself could not be read; it is left undeleted.
pub fn handle_message(dispatcher: &Dispatcher, message: &mut dyn QueueMessage) -> Result<MessageReport> {
    let (topic, payload) = parse_message(message)?;
    let mut reports = Vec::new();

    let mut actions = dispatcher.actions_for_topic(&topic, &payload);
    while let Some(item) = actions.next() {
        let report = match item {
            Ok((name, runnable)) => match runnable.execute(dispatcher.http()) {
                Ok(()) => {
                    tracing::info!(action = %name, topic = %topic, "action executed");
                    ActionReport::succeeded(name)
                }
                Err(e) => ActionReport::failed(Some(name), ActionState::Hydrated, &e),
            },
            Err(e) => {
                let name = actions.last_action().map(str::to_string);
                let reached = if name.is_some() {
                    ActionState::Matched
                } else {
                    ActionState::Unmatched
                };
                ActionReport::failed(name, reached, &e)
            }
        };

        let failed = report.state == ActionState::Failed;
        if failed {
            log_failure(&report, &topic);
        }
        reports.push(report);
        if failed {
            break;
        }
    }

    let failed = reports.iter().any(|r| r.state == ActionState::Failed);
    let mut deleted = false;
    let mut delete_error = None;
    if !failed {
        match message.delete() {
            Ok(()) => {
                deleted = true;
                tracing::debug!(message_id = message.message_id(), %topic, actions = reports.len(), "message deleted");
            }
            Err(e) => {
                tracing::error!(message_id = message.message_id(), %topic, error = %e, "message could not be deleted");
                delete_error = Some(e.to_string());
            }
        }
    }

    Ok(MessageReport {
        message_id: message.message_id().to_string(),
        topic,
        actions: reports,
        deleted,
        delete_error,
        handled_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Method, RelayConfig};
    use crate::handlers::{HandlerRegistry, HandlerResult};
    use crate::testing::FakeHttp;
    use serde_json::json;
    use std::sync::Arc;

    const CONFIG: &str = r#"
config:
  base_url: "https://{payload[company_name]}.example.com/"
actions:
  update_parent:
    topic: "{payload[company_name]}__child_created"
    endpoint: "parents/{payload[parent_id]}"
    method: PATCH
    payload:
      status: new status
  notify:
    topic: "{payload[company_name]}__child_created"
    endpoint: "notifications/"
    method: POST
  create_status:
    topic: "{payload[company_name]}__child_updated"
    endpoint: stati/
    method: POST
    payload:
      status: created
      parent: "{payload[id]}"
"#;

    fn dispatcher(http: Arc<FakeHttp>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(RelayConfig::from_yaml_str(CONFIG).unwrap()),
            http,
            Arc::new(HandlerRegistry::new()),
        )
        .unwrap()
    }

    fn envelope(payload: &Value) -> String {
        json!({"Message": payload.to_string(), "Timestamp": "2017-04-27T20:38:51.525Z"}).to_string()
    }

    fn message(topic: &str) -> LocalMessage {
        let payload = json!({"id": 1, "parent_id": 2, "company_name": "mycompany"});
        let mut message = LocalMessage::new(topic, &payload);
        message.body = envelope(&payload);
        message
    }

    #[test]
    fn successful_message_is_deleted() {
        let http = Arc::new(FakeHttp::new());
        let d = dispatcher(Arc::clone(&http));
        let mut msg = message("mycompany__child_updated");

        let report = handle_message(&d, &mut msg).unwrap();
        assert!(msg.is_acknowledged());
        assert!(report.deleted);
        assert_eq!(report.topic, "mycompany__child_updated");
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].state, ActionState::Succeeded);

        let calls = http.calls_with(Method::Post);
        assert_eq!(calls[0].url, "https://mycompany.example.com/stati/");
        assert_eq!(calls[0].body, Some(json!({"status": "created", "parent": "1"})));
    }

    #[test]
    fn unmatched_message_is_deleted() {
        let http = Arc::new(FakeHttp::new());
        let d = dispatcher(Arc::clone(&http));
        let mut msg = message("mycompany__unrelated");
        let report = handle_message(&d, &mut msg).unwrap();
        assert!(report.actions.is_empty());
        assert!(msg.is_acknowledged());
        assert!(http.calls().is_empty());
    }

    #[test]
    fn first_failure_stops_and_keeps_message() {
        let http = Arc::new(FakeHttp::new().with_status("https://mycompany.example.com/parents/2", 400));
        let d = dispatcher(Arc::clone(&http));
        let mut msg = message("mycompany__child_created");

        let report = handle_message(&d, &mut msg).unwrap();
        assert!(!msg.is_acknowledged());
        assert!(!report.deleted);
        assert!(report.failed());
        assert_eq!(report.actions.len(), 1);

        let failed = &report.actions[0];
        assert_eq!(failed.name.as_deref(), Some("update_parent"));
        assert_eq!(failed.reached, ActionState::Hydrated);
        assert_eq!(
            failed.response_body.as_deref(),
            Some("status 400 for https://mycompany.example.com/parents/2")
        );
        // notify never ran
        assert_eq!(http.calls().len(), 1);
    }

    #[test]
    fn both_actions_of_a_group_run_in_order() {
        let http = Arc::new(FakeHttp::new());
        let d = dispatcher(Arc::clone(&http));
        let mut msg = message("mycompany__child_created");

        let report = handle_message(&d, &mut msg).unwrap();
        let names: Vec<_> = report.actions.iter().filter_map(|a| a.name.clone()).collect();
        assert_eq!(names, ["update_parent", "notify"]);
        let urls: Vec<_> = http.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(
            urls,
            [
                "https://mycompany.example.com/parents/2",
                "https://mycompany.example.com/notifications/"
            ]
        );
        assert_eq!(
            http.calls()[1].body,
            Some(json!({"id": 1, "parent_id": 2, "company_name": "mycompany"}))
        );
    }

    #[test]
    fn hydration_failure_is_reported_by_name() {
        let config = RelayConfig::from_yaml_str(
            "actions:\n  audit:\n    topic: t\n    custom_handlers: [audit.record]\n",
        )
        .unwrap();
        let d = Dispatcher::new(
            Arc::new(config),
            Arc::new(FakeHttp::new()),
            Arc::new(HandlerRegistry::new()),
        )
        .unwrap();
        let mut msg = LocalMessage::new("t", &json!({}));
        let report = handle_message(&d, &mut msg).unwrap();
        assert_eq!(report.actions[0].name.as_deref(), Some("audit"));
        assert_eq!(report.actions[0].reached, ActionState::Matched);
        assert!(!msg.is_acknowledged());
    }

    #[test]
    fn handler_failure_keeps_message() {
        let mut registry = HandlerRegistry::new();
        registry.register("audit", "record", |_: &Value, _: &str, _: &Value| -> HandlerResult {
            Err("audit store unavailable".into())
        });
        let config = RelayConfig::from_yaml_str(
            "actions:\n  audit:\n    topic: t\n    custom_handlers: [audit.record]\n",
        )
        .unwrap();
        let d = Dispatcher::new(Arc::new(config), Arc::new(FakeHttp::new()), Arc::new(registry)).unwrap();
        let mut msg = LocalMessage::new("t", &json!({}));
        let report = handle_message(&d, &mut msg).unwrap();
        assert!(report.actions[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("audit store unavailable")));
        assert!(!report.deleted);
    }

    #[test]
    fn missing_topic_attribute_is_an_error() {
        let mut msg = LocalMessage::from_json_str(r#"{"Body": "{}"}"#).unwrap();
        let d = dispatcher(Arc::new(FakeHttp::new()));
        assert!(matches!(
            handle_message(&d, &mut msg),
            Err(RelayError::MissingTopicAttribute(_))
        ));
        assert!(!msg.is_acknowledged());
    }

    #[test]
    fn envelope_is_unwrapped() {
        let inner = json!({"id": 1});
        assert_eq!(parse_body(&envelope(&inner)).unwrap(), inner);
        let typed = json!({"Type": "Notification", "Message": inner.to_string()}).to_string();
        assert_eq!(parse_body(&typed).unwrap(), inner);
        // a bare "Message" key is payload, not an envelope
        let bare = json!({"Message": "hello"});
        assert_eq!(parse_body(&bare.to_string()).unwrap(), bare);
    }

    #[test]
    fn local_message_shapes() {
        let sqs = LocalMessage::from_json_str(
            r#"{"MessageId": "m-1", "Body": "{\"id\": 1}",
                "MessageAttributes": {"topic": {"StringValue": "a__created", "DataType": "String"}}}"#,
        )
        .unwrap();
        assert_eq!(sqs.message_id(), "m-1");
        assert_eq!(sqs.attribute("topic"), Some("a__created"));

        let snake = LocalMessage::from_json_str(
            r#"{"body": {"id": 1}, "message_attributes": {"topic": {"string_value": "a__created"}}}"#,
        )
        .unwrap();
        assert_eq!(parse_body(snake.body()).unwrap(), json!({"id": 1}));
        assert_eq!(snake.attribute("topic"), Some("a__created"));
        assert!(Uuid::parse_str(snake.message_id()).is_ok());
    }

    struct StuckMessage(LocalMessage);

    impl QueueMessage for StuckMessage {
        fn message_id(&self) -> &str {
            self.0.message_id()
        }

        fn body(&self) -> &str {
            self.0.body()
        }

        fn attribute(&self, name: &str) -> Option<&str> {
            self.0.attribute(name)
        }

        fn delete(&mut self) -> Result<()> {
            Err(RelayError::Io(std::io::Error::other("queue unreachable")))
        }
    }

    #[test]
    fn delete_failure_keeps_the_report() {
        let http = Arc::new(FakeHttp::new());
        let d = dispatcher(Arc::clone(&http));
        let mut msg = StuckMessage(message("mycompany__child_updated"));

        let report = handle_message(&d, &mut msg).unwrap();
        assert!(!report.deleted);
        assert!(!report.failed());
        assert_eq!(report.actions[0].state, ActionState::Succeeded);
        assert!(report.delete_error.as_deref().is_some_and(|e| e.contains("queue unreachable")));
        assert_eq!(http.calls().len(), 1);
    }
}
