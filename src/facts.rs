//! Fact bags and historical context.
//!
//! A `FactBag` is the per-evaluation view of a cart event. It is built fresh for
//! every live request and every replay step, then dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Named fact values for one evaluation instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactBag(Map<String, Value>);

impl FactBag {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Non-object payloads produce an empty bag.
    pub fn from_value(payload: &Value) -> Self {
        match payload {
            Value::Object(map) => Self(map.clone()),
            _ => Self::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Exact key first, then a dotted path into nested objects (`order.total`).
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(name) {
            return Some(v);
        }
        let mut parts = name.split('.');
        let mut cur = self.0.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_object()?.get(part)?;
        }
        Some(cur)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Past numeric series per fact name, supplied next to the fact bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoricalContext(HashMap<String, Vec<f64>>);

impl HistoricalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, series: Vec<f64>) {
        self.0.insert(name.into(), series);
    }

    pub fn series(&self, name: &str) -> &[f64] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Which payload fields feed the cart facts.
#[derive(Debug, Clone)]
pub struct CartFactNames {
    /// Numeric cart value, also the series tracked for statistical facts.
    pub value: String,
    /// Name of the `{ live, history }` fact derived from `value`.
    pub surge: String,
}

impl Default for CartFactNames {
    fn default() -> Self {
        Self { value: "cartTotal".to_string(), surge: "cartSurgeMetrics".to_string() }
    }
}

/// Cart value of a raw payload, 0.0 when absent or non-numeric.
pub fn cart_value(payload: &Value, names: &CartFactNames) -> f64 {
    payload.get(&names.value).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Build the fact bag and historical context for one cart event.
///
/// Every payload field is kept as-is. On top of that the cart value defaults to 0,
/// `items` falls back to `[primaryItem]`, `isPremiumMember` defaults to false, and
/// the surge fact carries the live value with `history` (oldest first).
pub fn cart_facts(
    payload: &Value,
    history: &[f64],
    names: &CartFactNames,
) -> (FactBag, HistoricalContext) {
    let mut facts = FactBag::from_value(payload);
    let live = cart_value(payload, names);
    facts.insert(names.value.clone(), json!(live));

    if !matches!(facts.get("items"), Some(Value::Array(_))) {
        let items = match payload.get("primaryItem") {
            Some(item) if !item.is_null() => vec![item.clone()],
            _ => Vec::new(),
        };
        facts.insert("items", Value::Array(items));
    }
    if !matches!(facts.get("isPremiumMember"), Some(Value::Bool(_))) {
        facts.insert("isPremiumMember", Value::Bool(false));
    }
    facts.insert(names.surge.clone(), json!({ "live": live, "history": history }));

    let mut ctx = HistoricalContext::new();
    ctx.insert(names.value.clone(), history.to_vec());
    (facts, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_lookup() {
        let facts = FactBag::from_value(&json!({ "order": { "total": 120 }, "user.isNew": true }));
        assert_eq!(facts.get("order.total"), Some(&json!(120)));
        assert_eq!(facts.get("user.isNew"), Some(&json!(true)));
        assert!(facts.get("order.missing").is_none());
    }

    #[test]
    fn test_cart_facts_defaults() {
        let names = CartFactNames::default();
        let (facts, ctx) = cart_facts(&json!({ "primaryItem": "Flat White" }), &[5.0, 6.0], &names);
        assert_eq!(facts.get("cartTotal").and_then(Value::as_f64), Some(0.0));
        assert_eq!(facts.get("items"), Some(&json!(["Flat White"])));
        assert_eq!(facts.get("isPremiumMember"), Some(&json!(false)));
        assert_eq!(facts.get("cartSurgeMetrics"), Some(&json!({ "live": 0.0, "history": [5.0, 6.0] })));
        assert_eq!(ctx.series("cartTotal"), &[5.0, 6.0]);
        assert!(ctx.series("other").is_empty());
    }

    #[test]
    fn test_cart_facts_keep_payload_fields() {
        let names = CartFactNames::default();
        let payload = json!({ "cartTotal": 42.5, "items": ["a"], "region": "US-East", "isPremiumMember": true });
        let (facts, _) = cart_facts(&payload, &[], &names);
        assert_eq!(facts.get("region"), Some(&json!("US-East")));
        assert_eq!(facts.get("items"), Some(&json!(["a"])));
        assert_eq!(facts.get("isPremiumMember"), Some(&json!(true)));
        assert_eq!(facts.get("cartTotal").and_then(Value::as_f64), Some(42.5));
    }
}
