use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing field '{field}' in template '{template}'")]
    MissingField { field: String, template: String },

    #[error("accumulator step '{step}' references unknown key '{key}'")]
    UnknownAccumulatorKey { step: String, key: String },

    #[error("{method} {url} failed with status {status}: {body}")]
    HttpFailure {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid topic pattern '{pattern}': {reason}")]
    InvalidTopicPattern { pattern: String, reason: String },

    #[error("unresolved custom handler: {0}")]
    UnresolvedCustomHandler(String),

    #[error("invalid template '{template}': {reason}")]
    TemplateSyntax { template: String, reason: String },

    #[error("cannot coerce field '{field}' with {marker}: {reason}")]
    Coercion {
        field: String,
        marker: &'static str,
        reason: String,
    },

    #[error("expression error: {0}")]
    Expression(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("action '{0}' declares an endpoint but no method")]
    MissingMethod(String),

    #[error("action '{0}' declares neither an endpoint nor custom handlers")]
    ActionWithoutTarget(String),

    #[error("message {0} has no 'topic' attribute")]
    MissingTopicAttribute(String),

    #[error("custom handler '{name}' failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Response body carried by an HTTP failure, if any.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            RelayError::HttpFailure { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
