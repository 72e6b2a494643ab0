//! Per-task answer state and the unit of work handed to an engine.

use crate::errors::EngineError;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the synthetic attribute that always resolves to today's date.
pub const TIMENOW: &str = "Timenow";
/// Attribute that carries comparison outcomes and failure notes.
pub const OK: &str = "Ok";
/// Attribute naming the requested operation.
pub const ACTION: &str = "Action";
/// Attribute naming the target application.
pub const APP: &str = "App";
/// Operation currently being performed, set by a parameter change.
pub const CHOSEN_FEATURE: &str = "chosen_feature";

const TIMENOW_FORMAT: &str = "%d-%m-%Y";

/// A single answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn text(value: impl Into<String>) -> Self {
        Scalar::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Scalar::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// An attribute holds either one scalar or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    List(Vec<Scalar>),
    Scalar(Scalar),
}

impl AttrValue {
    pub fn empty() -> Self {
        AttrValue::List(Vec::new())
    }

    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Scalar(Scalar::text(value))
    }

    pub fn bool(value: bool) -> Self {
        AttrValue::Scalar(Scalar::Bool(value))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::List(items) => items.iter().all(Scalar::is_empty),
            AttrValue::Scalar(s) => s.is_empty(),
        }
    }

    /// The value used when an attribute takes part in a comparison or is
    /// typed into a field. Lists contribute their most recent element.
    pub fn as_text(&self) -> String {
        match self {
            AttrValue::Scalar(s) => s.to_string(),
            AttrValue::List(items) => items.last().map(Scalar::to_string).unwrap_or_default(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::text(value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Scalar(Scalar::Text(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::bool(value)
    }
}

/// Mutable accumulator of answers for one in-flight task.
///
/// Owned by exactly one engine while its task runs. `Timenow` is never
/// stored; reads of it always produce the current date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Question {
    attrs: BTreeMap<String, AttrValue>,
}

impl Question {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attrs(attrs: BTreeMap<String, AttrValue>) -> Self {
        let mut question = Self::new();
        for (name, value) in attrs {
            question.set(name, value);
        }
        question
    }

    /// Looks an attribute up by exact name first, then case-insensitively.
    pub fn get(&self, name: &str) -> Option<AttrValue> {
        if name.eq_ignore_ascii_case(TIMENOW) {
            return Some(AttrValue::text(Local::now().format(TIMENOW_FORMAT).to_string()));
        }
        if let Some(value) = self.attrs.get(name) {
            return Some(value.clone());
        }
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.as_text())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        if name.eq_ignore_ascii_case(TIMENOW) {
            return;
        }
        self.attrs.insert(name, value.into());
    }

    /// Appends to a list attribute, promoting a scalar or creating the list.
    pub fn push(&mut self, name: &str, value: Scalar) {
        if name.eq_ignore_ascii_case(TIMENOW) {
            return;
        }
        let key = self
            .attrs
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        let slot = self.attrs.entry(key).or_insert_with(AttrValue::empty);
        *slot = match std::mem::replace(slot, AttrValue::empty()) {
            AttrValue::List(mut items) => {
                items.push(value);
                AttrValue::List(items)
            }
            AttrValue::Scalar(previous) if previous.is_empty() => AttrValue::List(vec![value]),
            AttrValue::Scalar(previous) => AttrValue::List(vec![previous, value]),
        };
    }

    /// Empties every attribute. `Timenow` is unaffected since it is synthetic.
    pub fn reset(&mut self) {
        for value in self.attrs.values_mut() {
            *value = AttrValue::empty();
        }
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.attrs)?)
    }
}

/// One unit of work: a question plus the request category it arrived through.
#[derive(Debug, Clone, PartialEq)]
pub struct Comando {
    pub question: Question,
    pub filtro: String,
}

#[derive(Serialize)]
struct ComandoEnvelope<'a> {
    question: String,
    filtro: &'a str,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    question: serde_json::Value,
    #[serde(default)]
    filtro: String,
}

impl Comando {
    pub fn new(question: Question, filtro: impl Into<String>) -> Self {
        Self {
            question,
            filtro: filtro.into(),
        }
    }

    /// Requested operation name (the `Action` attribute), trimmed.
    pub fn operation(&self) -> Option<String> {
        self.question
            .get_text(ACTION)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn app(&self) -> Option<String> {
        self.question
            .get_text(APP)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    /// Serializes to the envelope used at task submission: the question is
    /// nested as an encoded JSON string.
    pub fn to_json(&self) -> Result<String, EngineError> {
        let envelope = ComandoEnvelope {
            question: self.question.to_json()?,
            filtro: &self.filtro,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    /// Accepts the question either as an encoded string or as a plain object.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        let envelope: IncomingEnvelope = serde_json::from_value(value)?;
        let attrs: BTreeMap<String, AttrValue> = match envelope.question {
            serde_json::Value::String(encoded) => serde_json::from_str(&encoded)?,
            other => serde_json::from_value(other)?,
        };
        Ok(Self::new(Question::from_attrs(attrs), envelope.filtro))
    }
}
