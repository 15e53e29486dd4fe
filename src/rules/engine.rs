//! Immutable rule snapshots and their evaluation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::facts::{FactBag, HistoricalContext};
use crate::logging::{log_rule_rejected, log_unconditional_rule, log_unsupported_operator};
use crate::rules::{Action, Rule, RuleRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredAction {
    pub rule_id: String,
    pub rule_name: String,
    pub action: Action,
}

/// A rule that could not be loaded, or whose conditions faulted during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFault {
    pub rule_id: String,
    pub rule_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
    /// In registration order.
    pub triggered: Vec<TriggeredAction>,
    pub faults: Vec<RuleFault>,
}

impl Evaluation {
    /// The action that prices the cart: the first one triggered.
    pub fn first_action(&self) -> Option<&Action> {
        self.triggered.first().map(|t| &t.action)
    }
}

/// A read-only snapshot of rules. Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Arc<[Rule]>,
    rejected: Arc<[RuleFault]>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self { rules: Arc::from(Vec::new()), rejected: Arc::from(Vec::new()) }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        for rule in &rules {
            if rule.is_unconditional() {
                log_unconditional_rule(&rule.id);
            }
            for op in rule.when.unsupported_operators() {
                log_unsupported_operator(&rule.id, op);
            }
        }
        Self { rules: rules.into(), rejected: Arc::from(Vec::new()) }
    }

    /// Normalize active records one by one. A record that fails to normalize is
    /// reported in [`RuleSet::rejected`]; the others still load.
    pub fn from_records(records: &[RuleRecord]) -> Self {
        let mut rules = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for record in records.iter().filter(|r| r.is_active()) {
            match Rule::from_record(record) {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    log_rule_rejected(&record.id, &err.to_string());
                    rejected.push(RuleFault {
                        rule_id: record.id.clone(),
                        rule_name: record.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        let mut set = Self::new(rules);
        set.rejected = rejected.into();
        set
    }

    /// A single unsaved rule, for backtesting a draft.
    pub fn from_draft(schema: &Value) -> Result<Self, crate::rules::SchemaError> {
        Ok(Self::new(vec![Rule::from_draft(schema)?]))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rejected(&self) -> &[RuleFault] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Evaluate every rule in isolation. A rule whose conditions fault does not
    /// fire and is listed in `faults`; the remaining rules are unaffected.
    pub fn evaluate(&self, facts: &FactBag, history: &HistoricalContext) -> Evaluation {
        let mut out = Evaluation::default();
        let mut errors = Vec::new();
        for rule in self.rules.iter() {
            errors.clear();
            let passed = rule.when.evaluate_with(facts, history, &mut errors);
            if !errors.is_empty() {
                let reason = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
                out.faults.push(RuleFault {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    reason,
                });
            }
            if passed {
                out.triggered.push(TriggeredAction {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    action: rule.action.clone(),
                });
            }
        }
        out
    }

    /// Hex SHA-256 over the normalized rules.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(&*self.rules).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, schema: Value) -> RuleRecord {
        RuleRecord::new(id, format!("rule {id}"), schema)
    }

    fn facts(v: Value) -> FactBag {
        FactBag::from_value(&v)
    }

    #[test]
    fn test_registration_order() {
        let set = RuleSet::from_records(&[
            rec("b", json!({ "conditions": [{ "field": "x", "operator": "GREATER_THAN", "value": 1 }], "action": { "type": "discount", "payload": { "percentage": 5 } } })),
            rec("a", json!({ "conditions": [{ "field": "x", "operator": "GREATER_THAN", "value": 0 }], "action": { "type": "discount", "payload": { "percentage": 50 } } })),
        ]);
        let eval = set.evaluate(&facts(json!({ "x": 5 })), &HistoricalContext::new());
        let ids: Vec<&str> = eval.triggered.iter().map(|t| t.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(eval.first_action().and_then(|a| a.params.percentage), Some(5.0));
    }

    #[test]
    fn test_bad_record_rejected_rest_loads() {
        let set = RuleSet::from_records(&[
            rec("ok", json!({ "conditions": [], "action": { "type": "flag" } })),
            rec("bad", json!({ "conditions": [] })),
            rec("junk", json!("not json {")),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rejected().len(), 2);
        assert_eq!(set.rejected()[0].rule_id, "bad");
    }

    #[test]
    fn test_inactive_records_skipped() {
        let mut draft = rec("d", json!({ "conditions": [], "action": { "type": "flag" } }));
        draft.status = "draft".to_string();
        assert!(RuleSet::from_records(&[draft]).is_empty());
    }

    #[test]
    fn test_vacuous_and_fires() {
        let set = RuleSet::from_records(&[rec("all", json!({ "conditions": [], "action": { "type": "flag" } }))]);
        assert!(set.rules()[0].is_unconditional());
        let eval = set.evaluate(&FactBag::new(), &HistoricalContext::new());
        assert_eq!(eval.triggered.len(), 1);
    }

    #[test]
    fn test_empty_or_never_fires() {
        let set = RuleSet::from_records(&[rec(
            "none",
            json!({ "conditionLogic": "OR", "conditions": [], "action": { "type": "flag" } }),
        )]);
        let eval = set.evaluate(&FactBag::new(), &HistoricalContext::new());
        assert!(eval.triggered.is_empty());
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = RuleSet::from_records(&[rec("1", json!({ "conditions": [], "action": { "type": "flag" } }))]);
        let b = RuleSet::from_records(&[rec("1", json!({ "conditions": [], "action": { "type": "flag" } }))]);
        let c = RuleSet::from_records(&[rec("1", json!({ "conditions": [], "action": { "type": "discount" } }))]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_or_rule_fires_past_faulted_leaf() {
        let set = RuleSet::from_records(&[rec(
            "or",
            json!({
                "conditionLogic": "OR",
                "conditions": [
                    { "field": "risk", "operator": "GREATER_THAN", "value": 0, "type": "risk_matrix", "meta": { "weights": [[1.0]] } },
                    { "field": "cartTotal", "operator": "GREATER_THAN", "value": 10 }
                ],
                "action": { "type": "flag" }
            }),
        )]);
        let eval = set.evaluate(&facts(json!({ "risk": [1, 2], "cartTotal": 20 })), &HistoricalContext::new());
        assert_eq!(eval.triggered.len(), 1);
        assert_eq!(eval.faults.len(), 1);
        assert_eq!(eval.faults[0].rule_id, "or");
    }
}
