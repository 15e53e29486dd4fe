//! Rule model: normalized rules, their actions, and stored rule records.

pub mod blast_radius;
pub mod condition;
pub mod engine;
pub mod operator;
pub mod schema;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use condition::{Condition, ConditionError, ConditionTree, StatKind};
pub use engine::{Evaluation, RuleFault, RuleSet, TriggeredAction};
pub use operator::Operator;
pub use schema::SchemaError;

/// A rule after normalization. Both stored dialects end up here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub when: ConditionTree,
    pub action: Action,
}

impl Rule {
    /// True when the rule has no conditions and so fires on every event.
    pub fn is_unconditional(&self) -> bool {
        matches!(&self.when, ConditionTree::AllOf(children) if children.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub params: ActionParams,
}

impl Action {
    pub fn new(kind: impl Into<String>, params: ActionParams) -> Self {
        Self { kind: kind.into(), params }
    }
}

/// Action parameters. Known numeric fields are typed; the rest (`reason`, ...)
/// ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup_percentage: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionParams {
    pub fn percentage(pct: f64) -> Self {
        Self { percentage: Some(pct), ..Self::default() }
    }

    pub fn amount(amount: f64) -> Self {
        Self { amount: Some(amount), ..Self::default() }
    }

    /// Read params from any JSON value. Non-objects give empty params.
    ///
    /// Besides `percentage`/`amount`/`markupPercentage`, stored rules use
    /// `{ "type": "PERCENTAGE" | "FLAT" | "AMOUNT" | "FIXED", "value": n }`.
    pub fn from_value(v: &Value) -> Self {
        let Some(map) = v.as_object() else {
            return Self::default();
        };
        let mut params = Self::default();
        let mut typed_value: Option<(String, f64)> = None;
        for (key, value) in map {
            match key.as_str() {
                "percentage" => params.percentage = number_like(value),
                "amount" => params.amount = number_like(value),
                "markupPercentage" | "markup_percentage" => {
                    params.markup_percentage = number_like(value)
                }
                _ => {
                    params.extra.insert(key.clone(), value.clone());
                }
            }
        }
        if let (Some(Value::String(t)), Some(n)) =
            (map.get("type"), map.get("value").and_then(number_like))
        {
            typed_value = Some((t.to_ascii_uppercase(), n));
        }
        match typed_value {
            Some((t, n)) if t == "PERCENTAGE" || t == "PERCENT" => {
                params.percentage.get_or_insert(n);
            }
            Some((t, n)) if t == "FLAT" || t == "AMOUNT" || t == "FIXED" => {
                params.amount.get_or_insert(n);
            }
            _ => {}
        }
        params
    }
}

impl<'de> Deserialize<'de> for ActionParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(ActionParams::from_value(&v))
    }
}

/// Numbers, or numeric strings like `"15"`.
fn number_like(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A rule as stored: id, name, status and the raw schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub rule_schema: Value,
}

impl RuleRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule_schema: Value) -> Self {
        Self { id: id.into(), name: name.into(), status: default_status(), rule_schema }
    }

    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

fn default_status() -> String {
    "active".to_string()
}

fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("rule id must be a string or number, got {other}"))),
    }
}
