//! Condition leaves and the normalized condition tree.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::facts::{FactBag, HistoricalContext};
use crate::math::{self, Matrix, MathError};
use crate::rules::operator::Operator;

/// Window used by moving-average conditions that do not set `meta.window`.
pub const DEFAULT_MA_WINDOW: usize = 7;

/// How a condition turns its fact into the value that gets compared.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatKind {
    /// Raw fact value.
    Standard,
    /// `|z|` of the live value against its history.
    #[serde(rename = "zscore")]
    ZScore,
    /// Live value divided by the latest moving average of its history.
    MovingAverage { window: usize },
    /// Sum of `[vector] × weights`.
    RiskMatrix { weights: Option<Matrix> },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("risk matrix condition on `{fact}` has no weights")]
    MissingWeights { fact: String },
    #[error("risk matrix condition on `{fact}`: {source}")]
    Matrix {
        fact: String,
        #[source]
        source: MathError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub fact: String,
    pub operator: Operator,
    pub value: Value,
    pub kind: StatKind,
}

impl Condition {
    pub fn standard(fact: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self { fact: fact.into(), operator, value, kind: StatKind::Standard }
    }

    pub fn with_kind(mut self, kind: StatKind) -> Self {
        self.kind = kind;
        self
    }

    /// Live value plus the series it is judged against.
    ///
    /// A `{ live, history }` fact carries both. A plain number takes its series
    /// from the historical context under the same name.
    fn live_and_series(&self, facts: &FactBag, history: &HistoricalContext) -> Option<(f64, Vec<f64>)> {
        let fact = facts.get(&self.fact)?;
        if let Some(pair) = math::live_and_history(fact) {
            return Some(pair);
        }
        Some((fact.as_f64()?, history.series(&self.fact).to_vec()))
    }

    /// Evaluate, surfacing configuration errors (bad weights) to the caller.
    /// Missing or mistyped fact data is not an error; it just fails the condition.
    pub fn try_evaluate(&self, facts: &FactBag, history: &HistoricalContext) -> Result<bool, ConditionError> {
        match &self.kind {
            StatKind::Standard => Ok(match self.operator {
                Operator::ZScoreGreaterThan => {
                    match (self.live_and_series(facts, history), self.value.as_f64()) {
                        (Some((live, series)), Some(th)) => math::z_score(live, &series) > th,
                        _ => false,
                    }
                }
                _ => math::compare(
                    facts.get(&self.fact).unwrap_or(&Value::Null),
                    &self.operator,
                    &self.value,
                ),
            }),
            StatKind::ZScore => Ok(match self.live_and_series(facts, history) {
                Some((live, series)) => {
                    let z = math::z_score(live, &series);
                    math::compare_scalar(z.abs(), &self.operator, &self.value)
                }
                None => false,
            }),
            StatKind::MovingAverage { window } => Ok(match self.live_and_series(facts, history) {
                Some((live, series)) => match math::moving_average(&series, *window).last() {
                    Some(current) => math::compare_scalar(live / current, &self.operator, &self.value),
                    None => false,
                },
                None => false,
            }),
            StatKind::RiskMatrix { weights } => {
                let weights = weights
                    .as_ref()
                    .ok_or_else(|| ConditionError::MissingWeights { fact: self.fact.clone() })?;
                let vector = match facts.get(&self.fact).and_then(Value::as_array) {
                    Some(items) => match items.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>() {
                        Some(v) => v,
                        None => return Ok(false),
                    },
                    None => return Ok(false),
                };
                let product = math::multiply_matrices(&[vector], weights)
                    .map_err(|source| ConditionError::Matrix { fact: self.fact.clone(), source })?;
                let score: f64 = product.first().map(|row| row.iter().sum()).unwrap_or(0.0);
                Ok(math::compare_scalar(score, &self.operator, &self.value))
            }
        }
    }

    /// Configuration errors count as "not satisfied".
    pub fn evaluate(&self, facts: &FactBag, history: &HistoricalContext) -> bool {
        self.try_evaluate(facts, history).unwrap_or(false)
    }
}

/// Both rule dialects normalize to this tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionTree {
    AllOf(Vec<ConditionTree>),
    AnyOf(Vec<ConditionTree>),
    Leaf(Condition),
}

impl ConditionTree {
    /// Evaluate with short-circuiting. A leaf that errors contributes `false` and
    /// its error is pushed to `faults`; siblings keep evaluating.
    pub fn evaluate_with(
        &self,
        facts: &FactBag,
        history: &HistoricalContext,
        faults: &mut Vec<ConditionError>,
    ) -> bool {
        match self {
            ConditionTree::AllOf(children) => {
                children.iter().all(|c| c.evaluate_with(facts, history, faults))
            }
            ConditionTree::AnyOf(children) => {
                children.iter().any(|c| c.evaluate_with(facts, history, faults))
            }
            ConditionTree::Leaf(cond) => match cond.try_evaluate(facts, history) {
                Ok(passed) => passed,
                Err(err) => {
                    faults.push(err);
                    false
                }
            },
        }
    }

    pub fn evaluate(&self, facts: &FactBag, history: &HistoricalContext) -> bool {
        self.evaluate_with(facts, history, &mut Vec::new())
    }

    /// Fact names read anywhere in the tree.
    pub fn facts(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts(&self, out: &mut BTreeSet<String>) {
        match self {
            ConditionTree::AllOf(children) | ConditionTree::AnyOf(children) => {
                children.iter().for_each(|c| c.collect_facts(out))
            }
            ConditionTree::Leaf(cond) => {
                out.insert(cond.fact.clone());
            }
        }
    }

    /// Operator names no leaf can match, in tree order.
    pub fn unsupported_operators(&self) -> Vec<&str> {
        match self {
            ConditionTree::AllOf(children) | ConditionTree::AnyOf(children) => {
                children.iter().flat_map(ConditionTree::unsupported_operators).collect()
            }
            ConditionTree::Leaf(cond) if !cond.operator.is_supported() => vec![cond.operator.as_str()],
            ConditionTree::Leaf(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(v: Value) -> FactBag {
        FactBag::from_value(&v)
    }

    #[test]
    fn test_standard_compare() {
        let c = Condition::standard("cartTotal", Operator::GreaterThan, json!(100));
        let ctx = HistoricalContext::new();
        assert!(c.evaluate(&bag(json!({ "cartTotal": 150 })), &ctx));
        assert!(!c.evaluate(&bag(json!({ "cartTotal": 50 })), &ctx));
        assert!(!c.evaluate(&bag(json!({})), &ctx));
    }

    #[test]
    fn test_zscore_is_two_sided() {
        let mut ctx = HistoricalContext::new();
        ctx.insert("cartTotal", vec![100.0, 110.0, 95.0, 105.0, 90.0]);
        let c = Condition::standard("cartTotal", Operator::GreaterThan, json!(2))
            .with_kind(StatKind::ZScore);
        assert!(c.evaluate(&bag(json!({ "cartTotal": 200 })), &ctx));
        assert!(c.evaluate(&bag(json!({ "cartTotal": 0 })), &ctx));
        assert!(!c.evaluate(&bag(json!({ "cartTotal": 101 })), &ctx));
    }

    #[test]
    fn test_zscore_without_history_is_zero() {
        let c = Condition::standard("cartTotal", Operator::LessThan, json!(0.5))
            .with_kind(StatKind::ZScore);
        assert!(c.evaluate(&bag(json!({ "cartTotal": 9_999 })), &HistoricalContext::new()));
    }

    #[test]
    fn test_moving_average_ratio() {
        let mut ctx = HistoricalContext::new();
        ctx.insert("visits", vec![10.0, 10.0, 10.0, 20.0, 20.0, 20.0]);
        let c = Condition::standard("visits", Operator::GreaterThan, json!(1.2))
            .with_kind(StatKind::MovingAverage { window: 3 });
        // latest MA = 20, ratio = 30 / 20 = 1.5
        assert!(c.evaluate(&bag(json!({ "visits": 30 })), &ctx));
        assert!(!c.evaluate(&bag(json!({ "visits": 22 })), &ctx));
    }

    #[test]
    fn test_moving_average_insufficient_history() {
        let mut ctx = HistoricalContext::new();
        ctx.insert("visits", vec![10.0, 10.0]);
        let c = Condition::standard("visits", Operator::LessThan, json!(100))
            .with_kind(StatKind::MovingAverage { window: DEFAULT_MA_WINDOW });
        assert!(!c.evaluate(&bag(json!({ "visits": 1 })), &ctx));
    }

    #[test]
    fn test_risk_matrix_score() {
        let weights = vec![vec![0.5, 0.2], vec![0.1, 0.8]];
        let c = Condition::standard("risk", Operator::GreaterThan, json!(2.0))
            .with_kind(StatKind::RiskMatrix { weights: Some(weights) });
        // [1,2] x W = [0.7, 1.8] -> 2.5
        assert_eq!(c.try_evaluate(&bag(json!({ "risk": [1, 2] })), &HistoricalContext::new()), Ok(true));
        assert_eq!(c.try_evaluate(&bag(json!({ "risk": "high" })), &HistoricalContext::new()), Ok(false));
    }

    #[test]
    fn test_risk_matrix_mismatch_is_fault_not_panic() {
        let c = Condition::standard("risk", Operator::GreaterThan, json!(0))
            .with_kind(StatKind::RiskMatrix { weights: Some(vec![vec![1.0], vec![1.0], vec![1.0]]) });
        let facts = bag(json!({ "risk": [1, 2] }));
        assert!(matches!(
            c.try_evaluate(&facts, &HistoricalContext::new()),
            Err(ConditionError::Matrix { source: MathError::DimensionMismatch { .. }, .. })
        ));
        assert!(!c.evaluate(&facts, &HistoricalContext::new()));

        let missing = Condition::standard("risk", Operator::GreaterThan, json!(0))
            .with_kind(StatKind::RiskMatrix { weights: None });
        assert!(!missing.evaluate(&facts, &HistoricalContext::new()));
    }

    #[test]
    fn test_structured_fact_feeds_zscore_operator() {
        let c = Condition::standard("cartSurgeMetrics", Operator::ZScoreGreaterThan, json!(1.5));
        let facts = bag(json!({ "cartSurgeMetrics": { "live": 12.0, "history": [5, 6, 5.5, 6, 5] } }));
        assert!(c.evaluate(&facts, &HistoricalContext::new()));
    }

    #[test]
    fn test_flat_fact_feeds_zscore_operator_from_context() {
        let mut ctx = HistoricalContext::new();
        ctx.insert("cartTotal", vec![5.0, 6.0, 5.5, 6.0, 5.0]);
        let c = Condition::standard("cartTotal", Operator::ZScoreGreaterThan, json!(1.5));
        assert!(c.evaluate(&bag(json!({ "cartTotal": 12.0 })), &ctx));
        assert!(!c.evaluate(&bag(json!({ "cartTotal": 1.0 })), &ctx));
    }

    #[test]
    fn test_tree_or_survives_faulty_sibling() {
        let broken = Condition::standard("risk", Operator::GreaterThan, json!(0))
            .with_kind(StatKind::RiskMatrix { weights: Some(vec![vec![1.0]]) });
        let ok = Condition::standard("cartTotal", Operator::GreaterThan, json!(10));
        let tree = ConditionTree::AnyOf(vec![ConditionTree::Leaf(broken), ConditionTree::Leaf(ok)]);
        let mut faults = Vec::new();
        let facts = bag(json!({ "risk": [1, 2], "cartTotal": 20 }));
        assert!(tree.evaluate_with(&facts, &HistoricalContext::new(), &mut faults));
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn test_empty_groups() {
        let facts = FactBag::new();
        let ctx = HistoricalContext::new();
        assert!(ConditionTree::AllOf(vec![]).evaluate(&facts, &ctx));
        assert!(!ConditionTree::AnyOf(vec![]).evaluate(&facts, &ctx));
    }

    #[test]
    fn test_unsupported_operators_listed() {
        let typo = Condition::standard("cartTotal", Operator::parse("greaterThen"), json!(1));
        let ok = Condition::standard("cartTotal", Operator::GreaterThan, json!(1));
        let between = Condition::standard("cartTotal", Operator::parse("between"), json!([1, 5]));
        let tree = ConditionTree::AllOf(vec![
            ConditionTree::Leaf(typo),
            ConditionTree::AnyOf(vec![ConditionTree::Leaf(ok), ConditionTree::Leaf(between)]),
        ]);
        assert_eq!(tree.unsupported_operators(), vec!["greaterThen", "between"]);
    }
}
