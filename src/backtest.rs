//! Historical replay of a rule set over stored cart events.
//!
//! Events are processed in ascending `created_at` order. The history seen by the
//! event at index `i` holds the cart values of at most `history_window` events
//! before it, never `i` itself or anything later, so a replay can't peek ahead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::facts::{cart_facts, cart_value, CartFactNames};
use crate::logging::{log_backtest_summary, v_num, ProfileScope};
use crate::math;
use crate::pricing::{project, PricingPolicy};
use crate::rules::RuleSet;
use crate::window::RollingWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalEvent {
    pub payload: Value,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl HistoricalEvent {
    pub fn new(payload: Value, created_at: DateTime<Utc>) -> Self {
        Self { payload, created_at }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub history_window: usize,
    pub pricing: PricingPolicy,
    pub facts: CartFactNames,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { history_window: 20, pricing: PricingPolicy::default(), facts: CartFactNames::default() }
    }
}

impl ReplayConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            history_window: cfg.history_window,
            pricing: cfg.pricing_policy(),
            facts: cfg.fact_names(),
        }
    }
}

/// One replayed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStep {
    pub index: usize,
    pub created_at: DateTime<Utc>,
    pub history_len: usize,
    pub z_score: f64,
    pub original_price: f64,
    pub simulated_price: f64,
    /// Rule whose action priced the cart.
    pub triggered_rule: Option<String>,
    pub faults: usize,
}

/// Step-by-step replay. Each `next()` evaluates one event and only then adds its
/// cart value to the rolling window.
pub struct ReplaySteps<'a> {
    rules: &'a RuleSet,
    events: Vec<&'a HistoricalEvent>,
    cfg: &'a ReplayConfig,
    window: RollingWindow,
    index: usize,
}

impl<'a> ReplaySteps<'a> {
    pub fn new(rules: &'a RuleSet, events: &'a [HistoricalEvent], cfg: &'a ReplayConfig) -> Self {
        let mut ordered: Vec<&HistoricalEvent> = events.iter().collect();
        // stable: equal timestamps keep input order
        ordered.sort_by_key(|e| e.created_at);
        Self { rules, events: ordered, cfg, window: RollingWindow::new(cfg.history_window), index: 0 }
    }
}

impl Iterator for ReplaySteps<'_> {
    type Item = ReplayStep;

    fn next(&mut self) -> Option<ReplayStep> {
        let event = *self.events.get(self.index)?;
        let history = self.window.to_vec();
        let original = cart_value(&event.payload, &self.cfg.facts);
        let (facts, ctx) = cart_facts(&event.payload, &history, &self.cfg.facts);

        let eval = self.rules.evaluate(&facts, &ctx);
        let simulated = project(original, eval.first_action(), &self.cfg.pricing);

        let step = ReplayStep {
            index: self.index,
            created_at: event.created_at,
            history_len: history.len(),
            z_score: math::z_score(original, &history),
            original_price: original,
            simulated_price: simulated,
            triggered_rule: eval.triggered.first().map(|t| t.rule_id.clone()),
            faults: eval.faults.len(),
        };
        self.window.push(original);
        self.index += 1;
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.events.len() - self.index;
        (left, Some(left))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `MM-DD`
    pub time: String,
    pub original_value: f64,
    pub simulated_value: f64,
    pub events: u64,
    pub triggered: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub total_evaluated: u64,
    pub total_triggered: u64,
    pub total_original_revenue: f64,
    pub total_new_revenue: f64,
    pub revenue_delta: f64,
    pub rule_faults: u64,
    pub fingerprint: String,
    #[serde(rename = "timeSeriesData")]
    pub daily_series: Vec<DailyPoint>,
}

impl BacktestReport {
    pub fn empty(fingerprint: String) -> Self {
        Self {
            total_evaluated: 0,
            total_triggered: 0,
            total_original_revenue: 0.0,
            total_new_revenue: 0.0,
            revenue_delta: 0.0,
            rule_faults: 0,
            fingerprint,
            daily_series: Vec::new(),
        }
    }
}

#[derive(Default)]
struct DayBucket {
    original: f64,
    simulated: f64,
    events: u64,
    triggered: u64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Replay `events` through `rules`. Deterministic for the same inputs.
pub fn replay(rules: &RuleSet, events: &[HistoricalEvent], cfg: &ReplayConfig) -> BacktestReport {
    // Without a cancel flag the replay always runs to completion.
    let never = AtomicBool::new(false);
    run(rules, events, cfg, &never).unwrap_or_else(|| BacktestReport::empty(rules.fingerprint()))
}

/// Like [`replay`], but stops between events once `cancel` is set.
pub fn replay_cancellable(
    rules: &RuleSet,
    events: &[HistoricalEvent],
    cfg: &ReplayConfig,
    cancel: &AtomicBool,
) -> Result<BacktestReport> {
    run(rules, events, cfg, cancel).ok_or_else(|| anyhow!("backtest cancelled"))
}

fn run(
    rules: &RuleSet,
    events: &[HistoricalEvent],
    cfg: &ReplayConfig,
    cancel: &AtomicBool,
) -> Option<BacktestReport> {
    let _p = ProfileScope::with_context("backtest.replay", &[("events", v_num(events.len() as f64))]);
    let fingerprint = rules.fingerprint();

    let mut total_original = 0.0;
    let mut total_new = 0.0;
    let mut evaluated = 0u64;
    let mut triggered = 0u64;
    let mut faults = 0u64;
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for step in ReplaySteps::new(rules, events, cfg) {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        evaluated += 1;
        faults += step.faults as u64;
        total_original += step.original_price;
        total_new += step.simulated_price;

        let day = days.entry(step.created_at.date_naive()).or_default();
        day.original += step.original_price;
        day.simulated += step.simulated_price;
        day.events += 1;
        if step.triggered_rule.is_some() {
            triggered += 1;
            day.triggered += 1;
        }
    }

    let daily_series = days
        .into_iter()
        .map(|(date, b)| DailyPoint {
            date: date.format("%Y-%m-%d").to_string(),
            time: date.format("%m-%d").to_string(),
            original_value: round2(b.original),
            simulated_value: round2(b.simulated),
            events: b.events,
            triggered: b.triggered,
        })
        .collect();

    let report = BacktestReport {
        total_evaluated: evaluated,
        total_triggered: triggered,
        total_original_revenue: round2(total_original),
        total_new_revenue: round2(total_new),
        revenue_delta: round2(total_new - total_original),
        rule_faults: faults,
        fingerprint,
        daily_series,
    };
    log_backtest_summary(
        &report.fingerprint,
        report.total_evaluated,
        report.total_triggered,
        report.total_original_revenue,
        report.total_new_revenue,
        report.rule_faults,
    );
    Some(report)
}

/// Run a replay on the blocking pool, giving up after `timeout`.
///
/// On timeout the worker is told to stop at the next event boundary.
pub async fn replay_with_timeout(
    rules: RuleSet,
    events: Arc<[HistoricalEvent]>,
    cfg: ReplayConfig,
    timeout: Duration,
) -> Result<BacktestReport> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let handle = tokio::task::spawn_blocking(move || replay_cancellable(&rules, &events, &cfg, &flag));
    match tokio::time::timeout(timeout, handle).await {
        Ok(joined) => joined.context("backtest worker failed")?,
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            bail!("backtest exceeded {}s timeout", timeout.as_secs_f64())
        }
    }
}

/// Replay several rule sets over the same events, one scoped thread per CPU
/// (never more threads than sets). Reports come back in input order.
pub fn replay_many(sets: &[RuleSet], events: &[HistoricalEvent], cfg: &ReplayConfig) -> Result<Vec<BacktestReport>> {
    if sets.is_empty() {
        return Ok(Vec::new());
    }
    let threads = num_cpus::get().clamp(1, sets.len());
    let chunk = sets.len().div_ceil(threads);

    std::thread::scope(|s| {
        let handles: Vec<_> = sets
            .chunks(chunk)
            .map(|group| s.spawn(move || group.iter().map(|r| replay(r, events, cfg)).collect::<Vec<_>>()))
            .collect();
        let mut out = Vec::with_capacity(sets.len());
        for h in handles {
            out.extend(h.join().map_err(|_| anyhow!("replay worker panicked"))?);
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleRecord;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn ev(total: f64, day: u32, hour: u32) -> HistoricalEvent {
        HistoricalEvent::new(json!({ "cartTotal": total }), at(day, hour))
    }

    fn discount_over(threshold: f64, pct: f64) -> RuleSet {
        RuleSet::from_records(&[RuleRecord::new(
            "r",
            "discount",
            json!({
                "conditions": { "all": [{ "fact": "cartTotal", "operator": "greaterThan", "value": threshold }] },
                "event": { "type": "discount", "params": { "percentage": pct } }
            }),
        )])
    }

    #[test]
    fn test_empty_events_zero_report() {
        let report = replay(&discount_over(0.0, 10.0), &[], &ReplayConfig::default());
        assert_eq!(report.total_evaluated, 0);
        assert_eq!(report.total_original_revenue, 0.0);
        assert!(report.daily_series.is_empty());
    }

    #[test]
    fn test_totals_and_buckets() {
        let events = vec![ev(10.0, 2, 9), ev(30.0, 2, 10), ev(50.0, 3, 9)];
        let report = replay(&discount_over(20.0, 10.0), &events, &ReplayConfig::default());
        assert_eq!(report.total_evaluated, 3);
        assert_eq!(report.total_triggered, 2);
        assert_eq!(report.total_original_revenue, 90.0);
        assert_eq!(report.total_new_revenue, 82.0);
        assert_eq!(report.revenue_delta, -8.0);
        assert_eq!(report.daily_series.len(), 2);
        assert_eq!(report.daily_series[0].time, "03-02");
        assert_eq!(report.daily_series[0].simulated_value, 37.0);
        assert_eq!(report.daily_series[1].date, "2026-03-03");
    }

    #[test]
    fn test_steps_sorted_and_window_excludes_current() {
        let events = vec![ev(3.0, 4, 0), ev(1.0, 2, 0), ev(2.0, 3, 0)];
        let cfg = ReplayConfig { history_window: 1, ..ReplayConfig::default() };
        let rules = RuleSet::default();
        let steps: Vec<ReplayStep> = ReplaySteps::new(&rules, &events, &cfg).collect();
        let prices: Vec<f64> = steps.iter().map(|s| s.original_price).collect();
        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
        assert_eq!(steps[0].history_len, 0);
        assert_eq!(steps[2].history_len, 1);
        assert_eq!(steps[0].z_score, 0.0);
    }

    #[test]
    fn test_rounding() {
        let events = vec![ev(1.111, 1, 0), ev(1.111, 1, 1), ev(1.111, 1, 2)];
        let report = replay(&RuleSet::default(), &events, &ReplayConfig::default());
        assert_eq!(report.total_original_revenue, 3.33);
        assert_eq!(report.daily_series[0].original_value, 3.33);
    }

    #[test]
    fn test_cancelled_replay_errors() {
        let cancel = AtomicBool::new(true);
        let events = vec![ev(1.0, 1, 0)];
        assert!(replay_cancellable(&RuleSet::default(), &events, &ReplayConfig::default(), &cancel).is_err());
    }

    #[test]
    fn test_replay_many_keeps_order() {
        let events = vec![ev(10.0, 1, 0), ev(100.0, 1, 1)];
        let sets = vec![discount_over(5.0, 50.0), discount_over(50.0, 50.0), RuleSet::default()];
        let reports = replay_many(&sets, &events, &ReplayConfig::default()).unwrap();
        let totals: Vec<f64> = reports.iter().map(|r| r.total_new_revenue).collect();
        assert_eq!(totals, vec![55.0, 60.0, 110.0]);
    }

    #[tokio::test]
    async fn test_replay_with_timeout_completes() {
        let events: Arc<[HistoricalEvent]> = vec![ev(10.0, 1, 0)].into();
        let report = replay_with_timeout(discount_over(0.0, 10.0), events, ReplayConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.total_new_revenue, 9.0);
    }

    #[tokio::test]
    async fn test_replay_with_timeout_expires() {
        let start = at(1, 0);
        let events: Arc<[HistoricalEvent]> = (0..200_000)
            .map(|i| HistoricalEvent::new(json!({ "cartTotal": 10.0 }), start + chrono::Duration::seconds(i)))
            .collect();
        let err = replay_with_timeout(discount_over(0.0, 10.0), events, ReplayConfig::default(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"), "{err}");
    }
}
