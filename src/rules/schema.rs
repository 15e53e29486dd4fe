//! Normalizes stored rule documents into [`Rule`].
//!
//! Two dialects exist in stored data:
//!
//! ```text
//! flat:   { conditionLogic, conditions: [{ field, operator, value, type?, meta? }], action: { type, payload } }
//! nested: { conditions: { all | any: [{ fact, operator, value } | { all | any: [..] }] }, event: { type, params } }
//! ```
//!
//! Leaves of either dialect may use `field` or `fact`, and may carry `type`/`meta`.

use serde_json::{Map, Value};

use crate::math::Matrix;
use crate::rules::condition::{Condition, ConditionTree, StatKind, DEFAULT_MA_WINDOW};
use crate::rules::operator::Operator;
use crate::rules::{Action, ActionParams, Rule, RuleRecord};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("rule schema must be a JSON object")]
    NotAnObject,
    #[error("condition is missing `{0}`")]
    MissingField(&'static str),
    #[error("rule has no `conditions`")]
    MissingConditions,
    #[error("rule has no `action` or `event`")]
    MissingAction,
    #[error("unknown condition logic `{0}`")]
    UnknownCombinator(String),
    #[error("unknown statistical type `{0}`")]
    UnknownStatType(String),
    #[error("risk matrix weights on `{0}` must be a matrix of numbers")]
    InvalidWeights(String),
    #[error("invalid rule JSON: {0}")]
    Json(String),
}

impl Rule {
    /// Normalize one schema document. `id`/`name` come from the enclosing record.
    pub fn from_schema(id: impl Into<String>, name: impl Into<String>, schema: &Value) -> Result<Rule, SchemaError> {
        let obj = schema.as_object().ok_or(SchemaError::NotAnObject)?;
        let mut name = name.into();
        if name.is_empty() {
            name = obj.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        }
        let when = parse_conditions(obj)?;
        let action = parse_action(obj)?;
        Ok(Rule { id: id.into(), name, when, action })
    }

    pub fn from_record(record: &RuleRecord) -> Result<Rule, SchemaError> {
        // Some stores hand the schema back as a JSON string.
        match &record.rule_schema {
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw).map_err(|e| SchemaError::Json(e.to_string()))?;
                Rule::from_schema(record.id.clone(), record.name.clone(), &parsed)
            }
            other => Rule::from_schema(record.id.clone(), record.name.clone(), other),
        }
    }

    /// A draft that has not been saved yet. Uses its own `id` if present.
    pub fn from_draft(schema: &Value) -> Result<Rule, SchemaError> {
        let id = match schema.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "draft".to_string(),
        };
        Rule::from_schema(id, "", schema)
    }
}

fn parse_conditions(obj: &Map<String, Value>) -> Result<ConditionTree, SchemaError> {
    match obj.get("conditions") {
        Some(Value::Array(items)) => {
            let leaves = items.iter().map(parse_node).collect::<Result<Vec<_>, _>>()?;
            match combinator(obj.get("conditionLogic"))? {
                Group::All => Ok(ConditionTree::AllOf(leaves)),
                Group::Any => Ok(ConditionTree::AnyOf(leaves)),
            }
        }
        Some(node @ Value::Object(_)) => parse_node(node),
        _ => Err(SchemaError::MissingConditions),
    }
}

enum Group {
    All,
    Any,
}

fn combinator(v: Option<&Value>) -> Result<Group, SchemaError> {
    match v {
        None | Some(Value::Null) => Ok(Group::All),
        Some(Value::String(s)) => match s.trim().to_ascii_uppercase().as_str() {
            "AND" | "ALL" => Ok(Group::All),
            "OR" | "ANY" => Ok(Group::Any),
            _ => Err(SchemaError::UnknownCombinator(s.clone())),
        },
        Some(other) => Err(SchemaError::UnknownCombinator(other.to_string())),
    }
}

/// A group node (`all`/`any`) or a leaf condition.
fn parse_node(v: &Value) -> Result<ConditionTree, SchemaError> {
    let obj = v.as_object().ok_or(SchemaError::NotAnObject)?;
    if let Some(children) = obj.get("all") {
        return Ok(ConditionTree::AllOf(parse_children(children)?));
    }
    if let Some(children) = obj.get("any") {
        return Ok(ConditionTree::AnyOf(parse_children(children)?));
    }
    parse_leaf(obj).map(ConditionTree::Leaf)
}

fn parse_children(v: &Value) -> Result<Vec<ConditionTree>, SchemaError> {
    v.as_array()
        .ok_or(SchemaError::MissingConditions)?
        .iter()
        .map(parse_node)
        .collect()
}

fn parse_leaf(obj: &Map<String, Value>) -> Result<Condition, SchemaError> {
    let fact = obj
        .get("field")
        .or_else(|| obj.get("fact"))
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField("field"))?;
    let operator = obj
        .get("operator")
        .and_then(Value::as_str)
        .map(Operator::parse)
        .ok_or(SchemaError::MissingField("operator"))?;
    let value = obj.get("value").cloned().unwrap_or(Value::Null);
    let meta = obj.get("meta");

    let kind = match obj.get("type").and_then(Value::as_str).unwrap_or("standard") {
        "standard" => StatKind::Standard,
        "zscore" => StatKind::ZScore,
        "moving_average" => StatKind::MovingAverage { window: window(meta) },
        "risk_matrix" => StatKind::RiskMatrix { weights: weights(fact, meta)? },
        other => return Err(SchemaError::UnknownStatType(other.to_string())),
    };
    Ok(Condition { fact: fact.to_string(), operator, value, kind })
}

/// Missing or zero means the default; negative clamps to 0, which never passes.
fn window(meta: Option<&Value>) -> usize {
    match meta.and_then(|m| m.get("window")).and_then(Value::as_f64) {
        None => DEFAULT_MA_WINDOW,
        Some(w) if w == 0.0 => DEFAULT_MA_WINDOW,
        Some(w) if w < 0.0 => 0,
        Some(w) => w as usize,
    }
}

fn weights(fact: &str, meta: Option<&Value>) -> Result<Option<Matrix>, SchemaError> {
    let raw = match meta.and_then(|m| m.get("weights")) {
        None | Some(Value::Null) => return Ok(None),
        Some(raw) => raw,
    };
    let invalid = || SchemaError::InvalidWeights(fact.to_string());
    raw.as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(invalid)?
                .iter()
                .map(|cell| cell.as_f64().ok_or_else(invalid))
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect::<Result<Matrix, _>>()
        .map(Some)
}

fn parse_action(obj: &Map<String, Value>) -> Result<Action, SchemaError> {
    let raw = obj
        .get("action")
        .or_else(|| obj.get("event"))
        .and_then(Value::as_object)
        .ok_or(SchemaError::MissingAction)?;
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField("type"))?;
    let params = raw
        .get("params")
        .or_else(|| raw.get("payload"))
        .map(ActionParams::from_value)
        .unwrap_or_default();
    Ok(Action::new(kind, params))
}
