//! Entry points used by the CLI: live evaluation, backtests, and rule impact.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::backtest::{replay_with_timeout, BacktestReport, HistoricalEvent, ReplayConfig};
use crate::config::Config;
use crate::facts::{cart_facts, cart_value};
use crate::logging::{log, log_audit, log_evaluation, log_rule_fault, obj, params_hash, v_str, Domain, Level, ProfileScope};
use crate::pricing::project;
use crate::rules::blast_radius::{self, BlastRadius, FactUsage};
use crate::rules::{Rule, RuleFault, RuleSet, TriggeredAction};
use crate::storage::Store;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub timestamp: DateTime<Utc>,
    pub total_rules_analyzed: usize,
    /// Stored rules that could not be loaded.
    pub rejected_rules: Vec<RuleFault>,
    pub triggered_count: usize,
    pub actions: Vec<TriggeredAction>,
    pub base_price: f64,
    pub final_price: f64,
    /// Rules whose conditions faulted on this payload.
    pub faults: Vec<RuleFault>,
}

/// What a backtest replays.
pub enum BacktestTarget {
    /// An unsaved rule schema.
    Draft(Value),
    /// Every active rule in the store.
    Active,
    Rules(RuleSet),
}

pub struct PricingService {
    store: Arc<dyn Store>,
    cfg: Config,
}

impl PricingService {
    pub fn new(store: Arc<dyn Store>, cfg: Config) -> Self {
        Self { store, cfg }
    }

    /// Snapshot of the active rules. Bad records are rejected individually.
    pub async fn load_rules(&self) -> Result<RuleSet> {
        let records = self.store.active_rules().await.context("load active rules")?;
        Ok(RuleSet::from_records(&records))
    }

    pub async fn evaluate(&self, payload: &Value) -> Result<EvaluationResponse> {
        match payload.as_object() {
            Some(map) if !map.is_empty() => {}
            _ => bail!("payload must be a non-empty JSON object"),
        }
        let _p = ProfileScope::new("service.evaluate");
        let rules = self.load_rules().await?;

        let names = self.cfg.fact_names();
        let mut recent = self
            .store
            .recent_events(self.cfg.history_window)
            .await
            .context("load recent events")?;
        recent.reverse();
        let history: Vec<f64> = recent.iter().map(|e| cart_value(&e.payload, &names)).collect();

        let (facts, ctx) = cart_facts(payload, &history, &names);
        let eval = rules.evaluate(&facts, &ctx);
        for fault in &eval.faults {
            log_rule_fault(&fault.rule_id, &fault.reason);
        }

        let base_price = cart_value(payload, &names);
        let final_price = project(base_price, eval.first_action(), &self.cfg.pricing_policy());
        log_evaluation(rules.len(), eval.triggered.len(), base_price, final_price);

        if self.cfg.record_events {
            if let Err(e) = self.store.record_event(payload).await {
                log(
                    Level::Warn,
                    Domain::Store,
                    "record_event_failed",
                    obj(&[("error", v_str(&format!("{e:#}")))]),
                );
            }
        }

        let response = EvaluationResponse {
            timestamp: Utc::now(),
            total_rules_analyzed: rules.len(),
            rejected_rules: rules.rejected().to_vec(),
            triggered_count: eval.triggered.len(),
            actions: eval.triggered,
            base_price,
            final_price,
            faults: eval.faults,
        };
        log_audit(
            "evaluate",
            &rules.fingerprint(),
            &params_hash(&payload.to_string()),
            &params_hash(&json!({ "actions": response.actions, "finalPrice": final_price }).to_string()),
        );
        Ok(response)
    }

    /// Replay `target` over at most `limit` stored events (oldest first).
    pub async fn backtest(&self, target: BacktestTarget, limit: Option<usize>) -> Result<BacktestReport> {
        let rules = match target {
            BacktestTarget::Draft(schema) => RuleSet::from_draft(&schema).context("invalid draft rule")?,
            BacktestTarget::Active => self.load_rules().await?,
            BacktestTarget::Rules(rules) => rules,
        };
        let limit = limit.unwrap_or(self.cfg.backtest_event_limit);
        let events: Arc<[HistoricalEvent]> = self
            .store
            .events_ascending(limit)
            .await
            .context("load historical events")?
            .into();
        let fingerprint = rules.fingerprint();
        let report = replay_with_timeout(
            rules,
            events,
            ReplayConfig::from_config(&self.cfg),
            Duration::from_secs(self.cfg.backtest_timeout_secs),
        )
        .await?;
        log_audit(
            "backtest",
            &fingerprint,
            &params_hash(&limit.to_string()),
            &params_hash(&serde_json::to_string(&report).unwrap_or_default()),
        );
        Ok(report)
    }

    /// `None` when no rule has that id.
    pub async fn blast_radius(&self, rule_id: &str) -> Result<Option<BlastRadius>> {
        let record = match self.store.rule(rule_id).await.context("load rule")? {
            Some(record) => record,
            None => return Ok(None),
        };
        let target = Rule::from_record(&record).with_context(|| format!("rule {rule_id} is malformed"))?;
        let active = self.load_rules().await?;
        Ok(Some(blast_radius::blast_radius(&target, active.rules())))
    }

    pub async fn fact_usage(&self) -> Result<FactUsage> {
        let active = self.load_rules().await?;
        Ok(blast_radius::fact_usage(active.rules()))
    }
}
