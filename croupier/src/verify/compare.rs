//! Comparator descriptors and their evaluation.
//!
//! On disk a comparison is `[kind, op, lhs, rhs]` where `kind` is two letters,
//! `R` for an area read through OCR and `Q` for a question attribute.

use crate::errors::EngineError;
use crate::geometry::RelativeArea;
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Both operands are dates at least one week apart, the first being later.
    Periodo,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Periodo => "periodo",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "periodo" => Ok(CompareOp::Periodo),
            other => Err(EngineError::InvalidComparator(other.to_string())),
        }
    }
}

/// Where one side of a comparison gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Read(RelativeArea),
    Question(String),
}

impl Operand {
    pub fn kind(&self) -> char {
        match self {
            Operand::Read(_) => 'R',
            Operand::Question(_) => 'Q',
        }
    }

    fn parse(kind: char, raw: &Value) -> Result<Self, EngineError> {
        match kind {
            'R' => serde_json::from_value(raw.clone())
                .map(Operand::Read)
                .map_err(|e| EngineError::InvalidCommand(format!("bad read area {raw}: {e}"))),
            'Q' => raw
                .as_str()
                .map(|name| Operand::Question(strip_reference(name).to_string()))
                .ok_or_else(|| {
                    EngineError::InvalidCommand(format!("question operand must be a name, got {raw}"))
                }),
            other => Err(EngineError::InvalidVariableKind(other.to_string())),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Operand::Read(area) => json!(area),
            Operand::Question(name) => json!(format!(".{name}")),
        }
    }
}

/// Question references are recorded with a leading `.`.
pub fn strip_reference(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix('.').unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub lhs: Operand,
    pub rhs: Operand,
}

impl Comparison {
    pub fn kind(&self) -> String {
        [self.lhs.kind(), self.rhs.kind()].iter().collect()
    }

    pub fn parse(kind: &str, op: &str, lhs: &Value, rhs: &Value) -> Result<Self, EngineError> {
        let letters: Vec<char> = kind.trim().to_uppercase().chars().collect();
        let &[left, right] = letters.as_slice() else {
            return Err(EngineError::InvalidVariableKind(kind.to_string()));
        };
        for letter in [left, right] {
            if letter != 'R' && letter != 'Q' {
                return Err(EngineError::InvalidVariableKind(kind.to_string()));
            }
        }
        Ok(Self {
            op: op.parse()?,
            lhs: Operand::parse(left, lhs)?,
            rhs: Operand::parse(right, rhs)?,
        })
    }

    /// Reads the `[kind, op, lhs, rhs]` array form.
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let items = value
            .as_array()
            .filter(|items| items.len() == 4)
            .ok_or_else(|| {
                EngineError::InvalidCommand(format!("comparison must be [kind, op, lhs, rhs], got {value}"))
            })?;
        let kind = items[0]
            .as_str()
            .ok_or_else(|| EngineError::InvalidVariableKind(items[0].to_string()))?;
        let op = items[1]
            .as_str()
            .ok_or_else(|| EngineError::InvalidComparator(items[1].to_string()))?;
        Self::parse(kind, op, &items[2], &items[3])
    }

    pub fn to_value(&self) -> Value {
        json!([self.kind(), self.op.as_str(), self.lhs.to_value(), self.rhs.to_value()])
    }
}

/// Parses a date written with exactly eight digits as day, month, year.
/// Separators are ignored.
pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 8 {
        return Err(EngineError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(&digits, "%d%m%Y").map_err(|_| EngineError::InvalidDate(raw.to_string()))
}

/// Interprets the text as a number, accepting `.` or `,` as the decimal
/// separator. With both present the last one is the decimal separator.
pub fn parse_number(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty()
        || !compact
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
    {
        return None;
    }
    let normalized = match (compact.rfind('.'), compact.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => compact.replace(',', ""),
        (Some(_), Some(_)) => compact.replace('.', "").replace(',', "."),
        (None, Some(_)) => compact.replace(',', "."),
        _ => compact,
    };
    normalized.parse().ok()
}

fn ordering(lhs: &str, rhs: &str) -> Option<Ordering> {
    match (parse_number(lhs), parse_number(rhs)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(lhs.trim().cmp(rhs.trim())),
    }
}

/// Evaluates `lhs op rhs` over already resolved values.
pub fn evaluate(op: CompareOp, lhs: &str, rhs: &str) -> Result<bool, EngineError> {
    let order = match op {
        CompareOp::Periodo => {
            let first = parse_date(lhs)?;
            let second = parse_date(rhs)?;
            return Ok(first >= second && second <= first - Duration::days(7));
        }
        _ => match ordering(lhs, rhs) {
            Some(order) => order,
            None => return Ok(false),
        },
    };
    Ok(match op {
        CompareOp::Eq => order == Ordering::Equal,
        CompareOp::Ne => order != Ordering::Equal,
        CompareOp::Lt => order == Ordering::Less,
        CompareOp::Le => order != Ordering::Greater,
        CompareOp::Gt => order == Ordering::Greater,
        CompareOp::Ge | CompareOp::Periodo => order != Ordering::Less,
    })
}

/// A resolved operand: its label (`r0`, `q1`, ...) and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperand {
    pub label: String,
    pub value: String,
}

/// Outcome of a comparison together with the values it saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: bool,
    pub operands: Vec<ResolvedOperand>,
}

impl Resolution {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.operands
            .iter()
            .find(|operand| operand.label == label)
            .map(|operand| operand.value.as_str())
    }
}

/// Label for the operand at `index` (0 for the left side, 1 for the right).
pub fn operand_label(operand: &Operand, index: usize) -> String {
    format!("{}{}", operand.kind().to_ascii_lowercase(), index)
}
