//! Which rules read the same facts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::rules::Rule;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDependencies {
    pub id: String,
    pub name: String,
    pub dependencies: Vec<String>,
}

impl RuleDependencies {
    fn of(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            dependencies: rule.when.facts().into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collision {
    pub id: String,
    pub name: String,
    pub overlapping_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlastRadius {
    #[serde(rename = "targetRule")]
    pub target: RuleDependencies,
    pub collisions: Vec<Collision>,
}

/// Rules in `all` (other than `target` itself) sharing at least one fact with it.
pub fn blast_radius(target: &Rule, all: &[Rule]) -> BlastRadius {
    let target_deps = RuleDependencies::of(target);
    let collisions = all
        .iter()
        .filter(|r| r.id != target.id)
        .filter_map(|other| {
            let theirs = other.when.facts();
            let overlapping_fields: Vec<String> = target_deps
                .dependencies
                .iter()
                .filter(|f| theirs.contains(*f))
                .cloned()
                .collect();
            (!overlapping_fields.is_empty()).then(|| Collision {
                id: other.id.clone(),
                name: other.name.clone(),
                overlapping_fields,
            })
        })
        .collect();
    BlastRadius { target: target_deps, collisions }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactNode {
    pub rule_count: usize,
    pub is_colliding: bool,
}

/// Fact → rule usage graph over a rule set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactUsage {
    pub total_rules: usize,
    pub total_facts: usize,
    pub collisions_count: usize,
    pub facts: BTreeMap<String, FactNode>,
    pub rules: Vec<RuleDependencies>,
}

pub fn fact_usage(rules: &[Rule]) -> FactUsage {
    let rules: Vec<RuleDependencies> = rules.iter().map(RuleDependencies::of).collect();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for dep in rules.iter().flat_map(|r| r.dependencies.iter()) {
        *counts.entry(dep.clone()).or_default() += 1;
    }
    let facts: BTreeMap<String, FactNode> = counts
        .into_iter()
        .map(|(fact, rule_count)| (fact, FactNode { rule_count, is_colliding: rule_count > 1 }))
        .collect();
    FactUsage {
        total_rules: rules.len(),
        total_facts: facts.len(),
        collisions_count: facts.values().filter(|n| n.is_colliding).count(),
        facts,
        rules,
    }
}
