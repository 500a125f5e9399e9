use crate::error::{RelayError, Result};
use crate::template::{Sources, Template};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "patch" => Ok(Method::Patch),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// AccumulatorStep
// ---------------------------------------------------------------------------

/// One accumulation stage, written in config as `[name, url_template]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct AccumulatorStep {
    pub name: String,
    pub url: String,
}

impl From<(String, String)> for AccumulatorStep {
    fn from((name, url): (String, String)) -> Self {
        Self { name, url }
    }
}

impl From<AccumulatorStep> for (String, String) {
    fn from(step: AccumulatorStep) -> Self {
        (step.name, step.url)
    }
}

// ---------------------------------------------------------------------------
// ActionDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Field name → template. Non-string values are copied as they are.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accumulators: Vec<AccumulatorStep>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_map: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_handlers: Vec<String>,
}

// ---------------------------------------------------------------------------
// ActionTable
// ---------------------------------------------------------------------------

/// Actions in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionTable(Vec<(String, ActionDef)>);

impl ActionTable {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionDef)> {
        self.0.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn get(&self, name: &str) -> Option<&ActionDef> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, def)| def)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, def: ActionDef) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = def,
            None => self.0.push((name, def)),
        }
    }
}

impl Serialize for ActionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, def) in &self.0 {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

struct ActionTableVisitor;

impl<'de> Visitor<'de> for ActionTableVisitor {
    type Value = ActionTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of action name to action definition")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ActionTable, A::Error> {
        let mut table = ActionTable::default();
        while let Some((name, def)) = access.next_entry::<String, ActionDef>()? {
            table.insert(name, def);
        }
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for ActionTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(ActionTableVisitor)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomHandlersConfig {
    /// Plugin search paths. Recorded for external loaders; never read here.
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub base_url: String,
    /// Headers sent with every outgoing request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub custom_handlers: CustomHandlersConfig,
    /// Any other key, reachable from templates as `{config[key]}`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: BTreeMap::new(),
            timeout_seconds: default_timeout(),
            custom_handlers: CustomHandlersConfig::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Settings {
    /// The settings as a template source.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// RelayConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(rename = "config", default)]
    pub settings: Settings,
    #[serde(default)]
    pub actions: ActionTable,
}

impl RelayConfig {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Load from disk. Files ending in `.json` are parsed as JSON, everything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&data)
        } else {
            Self::from_yaml_str(&data)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        let mut template_errors = |name: &str, what: &str, raw: &str| {
            if let Err(e) = Template::parse(raw) {
                error(format!("action '{name}': {what}: {e}"));
            }
        };

        for (name, action) in self.actions.iter() {
            template_errors(name, "topic", &action.topic);
            if let Some(endpoint) = &action.endpoint {
                template_errors(name, "endpoint", endpoint);
            }
            for step in &action.accumulators {
                template_errors(name, &format!("accumulator '{}'", step.name), &step.url);
            }
            if let Some(payload) = &action.payload {
                for (field, template) in payload {
                    if let Value::String(raw) = template {
                        template_errors(name, &format!("payload field '{field}'"), raw);
                    }
                }
            }
        }
        if let Err(e) = Template::parse(&self.settings.base_url) {
            error(format!("base_url: {e}"));
        }

        for (name, action) in self.actions.iter() {
            // 1. Every action needs something to run
            if action.endpoint.is_none() && action.custom_handlers.is_empty() {
                error(format!(
                    "action '{name}' declares neither an endpoint nor custom handlers"
                ));
            }

            // 2. Endpoints need a method unless handlers take over
            if action.endpoint.is_some() && action.custom_handlers.is_empty() && action.method.is_none() {
                error(format!("action '{name}' declares an endpoint but no method"));
            }

            // 3. Handler names are plugin.function
            for handler in &action.custom_handlers {
                if !is_handler_name(handler) {
                    error(format!(
                        "action '{name}': custom handler '{handler}' must look like 'plugin.function'"
                    ));
                }
            }

            // 4. Static topic patterns must compile
            if let Ok(template) = Template::parse(&action.topic) {
                if template.is_static() {
                    let pattern = template.render(&Sources::new()).unwrap_or_default();
                    if let Err(e) = regex::Regex::new(&pattern) {
                        error(format!(
                            "action '{name}': topic '{}' is not a valid regex: {e}",
                            action.topic
                        ));
                    }
                }
            }
        }

        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        for (name, action) in self.actions.iter() {
            if action.endpoint.is_some() && !action.custom_handlers.is_empty() {
                warn(format!(
                    "action '{name}' declares both an endpoint and custom handlers; the endpoint is ignored"
                ));
            }

            if action.endpoint.is_none() && !action.custom_handlers.is_empty() {
                let unused = [
                    (!action.accumulators.is_empty(), "accumulators"),
                    (action.payload.is_some(), "payload"),
                    (!action.data_map.is_empty(), "data_map"),
                    (action.method.is_some(), "method"),
                ];
                for (_, key) in unused.iter().filter(|(set, _)| *set) {
                    warn(format!(
                        "action '{name}' only runs custom handlers; '{key}' is ignored"
                    ));
                }
            }

            let mut seen: HashSet<&str> = HashSet::from(["payload"]);
            for step in &action.accumulators {
                if !seen.insert(step.name.as_str()) {
                    warn(format!(
                        "action '{name}': accumulator step '{}' shadows an earlier level",
                        step.name
                    ));
                }
            }
        }

        let has_endpoints = self
            .actions
            .iter()
            .any(|(_, a)| a.endpoint.is_some() && a.custom_handlers.is_empty());
        if has_endpoints && self.settings.base_url.trim().is_empty() {
            warn("config.base_url is empty; endpoints must be absolute URLs".to_string());
        }

        warnings
    }

    /// Fail on the first error-level validation finding.
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(RelayError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }
}

pub(crate) fn is_handler_name(name: &str) -> bool {
    matches!(name.split_once('.'), Some((plugin, function))
        if !plugin.is_empty() && !function.is_empty() && !function.contains('.'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
