//! Format-string templates: `{root[key][key]}` placeholders resolved against
//! named JSON sources.
//!
//! `{{` and `}}` are literal braces. A placeholder root is an identifier;
//! each `[key]` or `.key` descends one level into an object (or, for a numeric
//! key, into an array).

use crate::error::{RelayError, Result};
use crate::Entry;
use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, satisfy},
    combinator::{all_consuming, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Named values a template can reference. Later additions shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Sources<'a> {
    named: Vec<(&'a str, &'a Value)>,
}

impl<'a> Sources<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'a str, value: &'a Value) -> Self {
        self.named.push((name, value));
        self
    }

    /// Expose every key of an entry as a source.
    pub fn with_entry(mut self, entry: &'a Entry) -> Self {
        for (name, value) in entry {
            self.named.push((name.as_str(), value));
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.named
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// FieldRef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    raw: String,
    root: String,
    keys: Vec<String>,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn accessor(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('['), take_while1(|c: char| c != ']'), char(']')),
        preceded(char('.'), identifier),
    ))(input)
}

fn field_path(input: &str) -> IResult<&str, (&str, Vec<&str>)> {
    all_consuming(pair(identifier, many0(accessor)))(input)
}

impl FieldRef {
    fn parse(raw: &str) -> Option<Self> {
        let (_, (root, keys)) = field_path(raw).ok()?;
        Some(Self {
            raw: raw.to_string(),
            root: root.to_string(),
            keys: keys.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn lookup<'a>(&self, sources: &Sources<'a>) -> Option<&'a Value> {
        let mut value = sources.get(&self.root)?;
        for key in &self.keys {
            value = match value {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(FieldRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

fn syntax(raw: &str, reason: impl Into<String>) -> RelayError {
    RelayError::TemplateSyntax {
        template: raw.to_string(),
        reason: reason.into(),
    }
}

fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                literal.push('{');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with("}}") {
                literal.push('}');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                return Err(syntax(raw, "single '}' encountered"));
            }

            let Some(end) = tail.find('}') else {
                return Err(syntax(raw, "unclosed '{'"));
            };
            let inner = &tail[1..end];
            let field = FieldRef::parse(inner)
                .ok_or_else(|| syntax(raw, format!("invalid placeholder '{{{inner}}}'")))?;

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Field(field));
            rest = &tail[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Placeholders in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &FieldRef> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(f) => Some(f),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.fields().next().is_none()
    }

    /// Substitute every placeholder. A placeholder that cannot be resolved is
    /// a `MissingField` error.
    pub fn render(&self, sources: &Sources) -> Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => {
                    let value = field.lookup(sources).ok_or_else(|| self.missing(field))?;
                    out.push_str(&render_value(value));
                }
            }
        }
        Ok(out)
    }

    /// Substitute only placeholders whose root is present in `sources`; the
    /// rest are kept verbatim. The output is itself a template string, so
    /// literal braces (including those inside substituted values) come back
    /// escaped.
    pub fn render_partial(&self, sources: &Sources) -> Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(&escape(text)),
                Segment::Field(field) if sources.contains(&field.root) => {
                    let value = field.lookup(sources).ok_or_else(|| self.missing(field))?;
                    out.push_str(&escape(&render_value(value)));
                }
                Segment::Field(field) => {
                    out.push('{');
                    out.push_str(&field.raw);
                    out.push('}');
                }
            }
        }
        Ok(out)
    }

    fn missing(&self, field: &FieldRef) -> RelayError {
        RelayError::MissingField {
            field: field.raw.clone(),
            template: self.raw.clone(),
        }
    }
}

/// Text form of a substituted value: strings verbatim, `null` as nothing,
/// everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Join a base URL and a path the way endpoint and accumulator URLs are
/// assembled.
pub fn join_url(base: &str, path: &str) -> String {
    if path.contains("://") || base.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
