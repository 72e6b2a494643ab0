//! Operation catalog: which screen each operation lives on and which answer
//! fields it exports, plus the schema of accepted input fields.

use crate::errors::EngineError;
use crate::question::{AttrValue, Question, Scalar, ACTION, APP, TIMENOW};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Attribute stamped on every ingested question with the submitting bot id.
pub const BOT_ID: &str = "BotId";

/// Name of the operation that only runs the base mapping.
pub const BASE_OPERATION: &str = "base";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Base,
    /// Reads state from the client without changing it.
    Passive,
    /// Changes state inside the client (chip transfers).
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub mode: OperationMode,
    /// Screen ("aba") the operation is performed on.
    pub screen: String,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Feature {
    fn new(mode: OperationMode, screen: &str, outputs: &[&str]) -> Self {
        Self {
            mode,
            screen: screen.to_string(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCatalog {
    pub operations: BTreeMap<String, Feature>,
    #[serde(default)]
    pub inputs: InputSchema,
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        use OperationMode::*;
        let operations = [
            ("base", Feature::new(Base, "clube", &[])),
            ("transaction", Feature::new(Passive, "transacoes", &["Listatransacoes"])),
            ("balance", Feature::new(Passive, "contador", &["Saldo"])),
            ("members", Feature::new(Passive, "mesa", &["Membros"])),
            ("club_stats", Feature::new(Passive, "membros", &[])),
            (
                "real_time_stats",
                Feature::new(
                    Passive,
                    "dados",
                    &["Ganhos", "Mãos", "bb100", "GanhoMTT", "Buyinspinup", "Taxa"],
                ),
            ),
            ("send_chips", Feature::new(Active, "contador", &["Ok", "Saldo"])),
            ("receive_chips", Feature::new(Active, "contador", &["Ok", "Saldo"])),
        ]
        .into_iter()
        .map(|(name, feature)| (name.to_string(), feature))
        .collect();

        Self {
            operations,
            inputs: InputSchema::default(),
        }
    }
}

impl FeatureCatalog {
    /// Exact name first, then case-insensitive.
    pub fn get(&self, operation: &str) -> Option<&Feature> {
        let operation = operation.trim();
        self.operations.get(operation).or_else(|| {
            self.operations
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(operation))
                .map(|(_, feature)| feature)
        })
    }

    pub fn screen_of(&self, operation: &str) -> Option<&str> {
        self.get(operation).map(|f| f.screen.as_str())
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Distinct screens referenced by the catalog, in name order.
    pub fn screens(&self) -> Vec<&str> {
        let mut screens: Vec<&str> = self.operations.values().map(|f| f.screen.as_str()).collect();
        screens.sort_unstable();
        screens.dedup();
        screens
    }

    /// Rejects catalogs the engine could not drive.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.operations.is_empty() {
            return Err(EngineError::InvalidCatalog("no operations declared".to_string()));
        }
        match self.operations.get(BASE_OPERATION) {
            Some(feature) if feature.mode == OperationMode::Base => {}
            Some(_) => {
                return Err(EngineError::InvalidCatalog(format!(
                    "operation '{BASE_OPERATION}' must use mode 'base'"
                )))
            }
            None => {
                return Err(EngineError::InvalidCatalog(format!(
                    "missing '{BASE_OPERATION}' operation"
                )))
            }
        }
        for (name, feature) in &self.operations {
            if name.trim().is_empty() || name.trim() != name {
                return Err(EngineError::InvalidCatalog(format!(
                    "operation name '{name}' is blank or padded"
                )));
            }
            if feature.screen.trim().is_empty() {
                return Err(EngineError::InvalidCatalog(format!(
                    "operation '{name}' has no screen"
                )));
            }
            if let Some(blank) = feature.outputs.iter().find(|o| o.trim().is_empty()) {
                return Err(EngineError::InvalidCatalog(format!(
                    "operation '{name}' declares a blank output field '{blank}'"
                )));
            }
        }
        self.inputs.validate()
    }
}

/// The input fields a submitted task may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSchema {
    pub fields: Vec<String>,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            fields: [
                "App",
                "Mode",
                "Action",
                "Id",
                "Listids",
                "Club",
                "Chipamount",
                TIMENOW,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl InputSchema {
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.eq_ignore_ascii_case(name.trim()))
            .map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.trim().is_empty() {
                return Err(EngineError::InvalidCatalog("blank input field".to_string()));
            }
            if !seen.insert(field.to_lowercase()) {
                return Err(EngineError::InvalidCatalog(format!(
                    "duplicate input field '{field}'"
                )));
            }
        }
        for required in [APP, ACTION] {
            if self.canonical(required).is_none() {
                return Err(EngineError::InvalidCatalog(format!(
                    "input schema must declare '{required}'"
                )));
            }
        }
        Ok(())
    }

    /// Builds a question from a raw input object.
    ///
    /// Keys outside the schema are dropped, matching keys are renamed to their
    /// canonical spelling, null and blank values are skipped. `Timenow` is
    /// synthetic and never copied.
    pub fn build_question(
        &self,
        raw: &serde_json::Map<String, Value>,
        bot_id: &str,
    ) -> Result<Question, EngineError> {
        let mut question = Question::new();
        for (key, value) in raw {
            let Some(field) = self.canonical(key) else {
                debug!("Dropping input key '{}' outside the schema", key);
                continue;
            };
            if field.eq_ignore_ascii_case(TIMENOW) {
                continue;
            }
            match to_attr(value) {
                Some(attr) if !attr.is_empty() => question.set(field, attr),
                Some(_) => {}
                None => {
                    return Err(EngineError::InvalidCommand(format!(
                        "input field '{field}' holds an unsupported value: {value}"
                    )))
                }
            }
        }
        if question.get(APP).is_none() || question.get(ACTION).is_none() {
            warn!("Input is missing '{}' or '{}'", APP, ACTION);
        }
        question.set(BOT_ID, bot_id);
        Ok(question)
    }
}

fn to_scalar(value: &Value) -> Option<Scalar> {
    match value {
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| n.as_f64().map(Scalar::Float)),
        Value::String(s) => Some(Scalar::text(s.trim())),
        _ => None,
    }
}

/// `None` for shapes a question cannot hold; `Some(empty)` for null.
fn to_attr(value: &Value) -> Option<AttrValue> {
    match value {
        Value::Null => Some(AttrValue::empty()),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(to_scalar)
            .collect::<Option<Vec<_>>>()
            .map(AttrValue::List),
        Value::Object(_) => None,
        scalar => to_scalar(scalar).map(AttrValue::Scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_catalog_is_valid() {
        let catalog = FeatureCatalog::default();
        catalog.validate().unwrap();
        assert_eq!(catalog.screen_of("balance"), Some("contador"));
        assert_eq!(catalog.screen_of("Send_Chips"), Some("contador"));
        assert_eq!(catalog.get("send_chips").unwrap().mode, OperationMode::Active);
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn catalog_without_base_is_rejected() {
        let mut catalog = FeatureCatalog::default();
        catalog.operations.remove(BASE_OPERATION);
        assert!(matches!(
            catalog.validate(),
            Err(EngineError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn duplicate_input_fields_are_rejected() {
        let mut catalog = FeatureCatalog::default();
        catalog.inputs.fields.push("club".to_string());
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn catalog_loads_from_yaml() {
        let yaml = r#"
operations:
  base: { mode: base, screen: clube }
  balance: { mode: passive, screen: contador, outputs: [Saldo] }
inputs: [App, Action, Id]
"#;
        let catalog: FeatureCatalog = serde_yaml::from_str(yaml).unwrap();
        catalog.validate().unwrap();
        assert_eq!(catalog.get("balance").unwrap().outputs, vec!["Saldo"]);
        assert_eq!(catalog.inputs.fields.len(), 3);
    }

    #[test]
    fn build_question_keeps_schema_fields_only() {
        let schema = InputSchema::default();
        let raw = json!({
            "app": "pppoker",
            "ACTION": "send_chips",
            "Chipamount": 200,
            "Listids": ["11", "12"],
            "Club": "",
            "Id": null,
            "Timenow": "01-01-2000",
            "Unrelated": "x"
        });
        let question = schema
            .build_question(raw.as_object().unwrap(), "bot-7")
            .unwrap();

        assert_eq!(question.get_text("App").as_deref(), Some("pppoker"));
        assert!(question.attrs().contains_key("Action"));
        assert_eq!(
            question.get("Chipamount"),
            Some(AttrValue::Scalar(Scalar::Int(200)))
        );
        assert_eq!(question.get_text("Listids").as_deref(), Some("12"));
        assert!(!question.attrs().contains_key("Club"));
        assert!(!question.attrs().contains_key("Id"));
        assert!(!question.attrs().contains_key("Unrelated"));
        assert!(!question.attrs().contains_key(TIMENOW));
        assert_eq!(question.get_text(BOT_ID).as_deref(), Some("bot-7"));
    }

    #[test]
    fn build_question_rejects_nested_objects() {
        let schema = InputSchema::default();
        let raw = json!({ "App": { "name": "pppoker" } });
        assert!(matches!(
            schema.build_question(raw.as_object().unwrap(), "bot"),
            Err(EngineError::InvalidCommand(_))
        ));
    }
}
