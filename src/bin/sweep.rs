//! Replay several draft rules over one event file in parallel and rank them.
//!
//! Usage: sweep <events.jsonl> <draft.json>...

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};

use pricing_engine::backtest::{replay_many, HistoricalEvent, ReplayConfig};
use pricing_engine::config::Config;
use pricing_engine::rules::RuleSet;

fn load_events(path: &str) -> Result<Vec<HistoricalEvent>> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("open {path}"))?);
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line).with_context(|| format!("{path}:{}", n + 1))?);
    }
    Ok(events)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (events_path, drafts) = args
        .split_first()
        .ok_or_else(|| anyhow!("usage: sweep <events.jsonl> <draft.json>..."))?;
    if drafts.is_empty() {
        bail!("no draft rules given");
    }

    let events = load_events(events_path)?;
    let mut sets = Vec::with_capacity(drafts.len());
    for path in drafts {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        let draft: serde_json::Value = serde_json::from_str(&raw).with_context(|| format!("parse {path}"))?;
        sets.push(RuleSet::from_draft(&draft).with_context(|| format!("invalid draft {path}"))?);
    }

    let cfg = ReplayConfig::from_config(&Config::from_env());
    let started = Instant::now();
    let reports = replay_many(&sets, &events, &cfg)?;
    let elapsed = started.elapsed();

    let mut ranked: Vec<_> = drafts.iter().zip(reports.iter()).collect();
    ranked.sort_by(|a, b| b.1.revenue_delta.total_cmp(&a.1.revenue_delta));

    println!("{:<32} {:>10} {:>12} {:>12} {:>10}", "draft", "triggered", "original", "simulated", "delta");
    for (path, r) in &ranked {
        println!(
            "{:<32} {:>10} {:>12.2} {:>12.2} {:>10.2}",
            path, r.total_triggered, r.total_original_revenue, r.total_new_revenue, r.revenue_delta
        );
    }
    eprintln!("{} drafts x {} events in {:.2?}", sets.len(), events.len(), elapsed);
    Ok(())
}
