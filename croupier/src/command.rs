//! Recorded commands and the files that hold them.
//!
//! A command file is a JSON array of `{action, position, value, condition}`
//! objects. Loading validates every entry into a [`Command`] so malformed
//! recordings fail before anything touches the screen.

use crate::errors::EngineError;
use crate::geometry::{RelativeArea, RelativePosition, Rgb};
use crate::question::AttrValue;
use crate::scroll::ScrollSpec;
use crate::verify::compare::{strip_reference, Comparison};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A click is only performed when this pixel shows the expected color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorCondition {
    pub position: RelativePosition,
    pub expected: Rgb,
}

/// Text source for a write step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteText {
    /// `"text"` on disk, typed without the quotes.
    Literal(String),
    /// `$NAME` on disk, resolved from the environment at dispatch time.
    Secret(String),
    /// `.Name` on disk, resolved from the question at dispatch time.
    Question(String),
    Raw(String),
}

impl WriteText {
    pub fn parse(raw: &str) -> Self {
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            WriteText::Literal(raw[1..raw.len() - 1].to_string())
        } else if let Some(name) = raw.strip_prefix('$') {
            WriteText::Secret(name.trim().to_string())
        } else if raw.starts_with('.') {
            WriteText::Question(strip_reference(raw).to_string())
        } else {
            WriteText::Raw(raw.to_string())
        }
    }

    pub fn to_raw(&self) -> String {
        match self {
            WriteText::Literal(text) => format!("\"{text}\""),
            WriteText::Secret(name) => format!("${name}"),
            WriteText::Question(name) => format!(".{name}"),
            WriteText::Raw(text) => text.clone(),
        }
    }
}

/// One recorded automation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand", into = "RawCommand")]
pub enum Command {
    Click {
        position: RelativePosition,
        condition: Option<ColorCondition>,
    },
    Write {
        text: WriteText,
    },
    Color {
        position: RelativePosition,
        expected: Rgb,
    },
    Read {
        area: RelativeArea,
        attribute: String,
    },
    Compare(Comparison),
    Scroll(ScrollSpec),
    ParamChange {
        params: BTreeMap<String, AttrValue>,
    },
    Webhook {
        params: BTreeMap<String, AttrValue>,
    },
}

impl Command {
    /// Action name as written to command files.
    pub fn action(&self) -> &'static str {
        match self {
            Command::Click { .. } => "click",
            Command::Write { .. } => "write",
            Command::Color { .. } => "color",
            Command::Read { .. } => "read",
            Command::Compare(_) => "compare",
            Command::Scroll(_) => "scroll",
            Command::ParamChange { .. } => "paramChange",
            Command::Webhook { .. } => "webhook",
        }
    }
}

/// The loosely typed on-disk shape of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

fn invalid(action: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidCommand(format!("{action}: {detail}"))
}

fn required<'a>(field: &'a Option<Value>, action: &str, name: &str) -> Result<&'a Value, EngineError> {
    field
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or_else(|| invalid(action, format!("missing {name}")))
}

fn parse_field<T: serde::de::DeserializeOwned>(
    field: &Option<Value>,
    action: &str,
    name: &str,
) -> Result<T, EngineError> {
    let value = required(field, action, name)?;
    serde_json::from_value(value.clone()).map_err(|e| invalid(action, format!("bad {name} {value}: {e}")))
}

fn parse_condition(field: &Option<Value>) -> Result<Option<ColorCondition>, EngineError> {
    match field {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.is_empty() => Ok(None),
        Some(value) => {
            let (position, expected): (RelativePosition, Rgb) = serde_json::from_value(value.clone())
                .map_err(|e| invalid("click", format!("bad condition {value}: {e}")))?;
            Ok(Some(ColorCondition { position, expected }))
        }
    }
}

fn parse_params(field: &Option<Value>, action: &str) -> Result<BTreeMap<String, AttrValue>, EngineError> {
    let Some(value) = field.as_ref().filter(|v| !v.is_null()) else {
        return Ok(BTreeMap::new());
    };
    let object = value
        .as_object()
        .ok_or_else(|| invalid(action, format!("parameters must be an object, got {value}")))?;
    object
        .iter()
        .map(|(key, value)| {
            let attr = if value.is_null() {
                AttrValue::empty()
            } else {
                serde_json::from_value(value.clone())
                    .map_err(|e| invalid(action, format!("bad parameter {key}: {e}")))?
            };
            Ok((key.clone(), attr))
        })
        .collect()
}

impl TryFrom<RawCommand> for Command {
    type Error = EngineError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let action = raw.action.trim().to_lowercase();
        let command = match action.as_str() {
            "click" => Command::Click {
                position: parse_field(&raw.position, "click", "position")?,
                condition: parse_condition(&raw.condition)?,
            },
            "write" => {
                let text = required(&raw.value, "write", "value")?;
                let text = match text {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Command::Write {
                    text: WriteText::parse(&text),
                }
            }
            "color" => Command::Color {
                position: parse_field(&raw.position, "color", "position")?,
                expected: parse_field(&raw.value, "color", "value")?,
            },
            "read" => {
                let attribute: String = parse_field(&raw.value, "read", "value")?;
                let attribute = strip_reference(&attribute).to_string();
                if attribute.is_empty() {
                    return Err(invalid("read", "blank attribute name"));
                }
                Command::Read {
                    area: parse_field(&raw.position, "read", "position")?,
                    attribute,
                }
            }
            "compare" | "compare_variables" => {
                Command::Compare(Comparison::from_value(required(&raw.value, "compare", "value")?)?)
            }
            "scroll" => Command::Scroll(ScrollSpec::from_value(required(&raw.value, "scroll", "value")?)?),
            "paramchange" | "param_change" => Command::ParamChange {
                params: parse_params(&raw.value, "paramChange")?,
            },
            "webhook" => Command::Webhook {
                params: parse_params(&raw.value, "webhook")?,
            },
            _ => return Err(EngineError::InvalidCommand(format!("unknown action '{}'", raw.action))),
        };
        Ok(command)
    }
}

impl From<&Command> for RawCommand {
    fn from(command: &Command) -> Self {
        let action = command.action().to_string();
        let dummy = Some(json!([0, 0]));
        let (position, value, condition) = match command {
            Command::Click { position, condition } => (
                Some(json!(position)),
                None,
                Some(match condition {
                    Some(c) => json!([c.position, c.expected]),
                    None => Value::Null,
                }),
            ),
            Command::Write { text } => (dummy, Some(json!(text.to_raw())), None),
            Command::Color { position, expected } => (Some(json!(position)), Some(json!(expected)), None),
            Command::Read { area, attribute } => (Some(json!(area)), Some(json!(attribute)), None),
            Command::Compare(comparison) => (dummy, Some(comparison.to_value()), None),
            Command::Scroll(spec) => (dummy, Some(spec.to_value()), None),
            Command::ParamChange { params } | Command::Webhook { params } => {
                (None, Some(json!(params)), None)
            }
        };
        RawCommand {
            action,
            position,
            value,
            condition,
        }
    }
}

impl From<Command> for RawCommand {
    fn from(command: Command) -> Self {
        RawCommand::from(&command)
    }
}

/// The four recorded mapping kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Common setup, run once when an engine starts.
    Base,
    /// Navigation to a screen.
    Nav,
    /// The operation itself.
    Act,
    /// Navigation away from a screen.
    Ret,
}

impl MappingKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            MappingKind::Base => "Base",
            MappingKind::Nav => "Nav",
            MappingKind::Act => "Act",
            MappingKind::Ret => "Ret",
        }
    }
}

/// Locates, loads and appends command files under a mapping root.
#[derive(Debug, Clone)]
pub struct CommandStore {
    root: PathBuf,
}

impl CommandStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self, app: &str) -> PathBuf {
        self.root.join(app.trim().to_lowercase())
    }

    /// `<root>/<app>/<Kind>/<name>.txt`; the base mapping is always `Base.txt`.
    pub fn path(&self, app: &str, kind: MappingKind, name: &str) -> PathBuf {
        let file = match kind {
            MappingKind::Base => "Base".to_string(),
            _ => name.trim().to_string(),
        };
        self.app_dir(app).join(kind.dir_name()).join(format!("{file}.txt"))
    }

    pub fn load_mapping(&self, app: &str, kind: MappingKind, name: &str) -> Result<Vec<Command>, EngineError> {
        let path = self.path(app, kind, name);
        let commands = Self::load(&path)?;
        if commands.is_empty() {
            warn!("Mapping {} is missing or empty", path.display());
        }
        Ok(commands)
    }

    /// Reads a command file. A missing or blank file is an empty sequence.
    pub fn load(path: &Path) -> Result<Vec<Command>, EngineError> {
        let Some(entries) = Self::read_entries(path)? else {
            return Ok(Vec::new());
        };
        let mut commands = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let raw: RawCommand = serde_json::from_value(entry).map_err(|e| {
                EngineError::InvalidCommand(format!("{} entry {}: {}", path.display(), index, e))
            })?;
            let command = Command::try_from(raw).map_err(|e| {
                warn!("{} entry {} rejected: {}", path.display(), index, e);
                e
            })?;
            commands.push(command);
        }
        debug!("Loaded {} commands from {}", commands.len(), path.display());
        Ok(commands)
    }

    /// Appends one command, rewriting the whole array and keeping every
    /// existing entry as it was.
    pub fn append(command: &Command, path: &Path) -> Result<(), EngineError> {
        let mut entries = Self::read_entries(path)?.unwrap_or_default();
        entries.push(serde_json::to_value(RawCommand::from(command))?);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    fn read_entries(path: &Path) -> Result<Option<Vec<Value>>, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }
}
