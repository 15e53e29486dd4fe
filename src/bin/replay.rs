//! Offline replay of one draft rule over events read from stdin.
//!
//! Usage: replay <draft.json> < events.jsonl
//!
//! Each stdin line is `{"payload": {...}, "createdAt": "..."}`. Prints the
//! backtest report as JSON; with `--steps`, prints one line per event instead.

use std::io::{self, BufRead};

use anyhow::{anyhow, Context, Result};

use pricing_engine::backtest::{replay, HistoricalEvent, ReplayConfig, ReplaySteps};
use pricing_engine::config::Config;
use pricing_engine::rules::RuleSet;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let steps = args.iter().any(|a| a == "--steps");
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("usage: replay <draft.json> [--steps] < events.jsonl"))?;

    let draft: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).with_context(|| format!("read {path}"))?)?;
    let rules = RuleSet::from_draft(&draft).context("invalid draft rule")?;

    let mut events = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoricalEvent>(&line) {
            Ok(ev) => events.push(ev),
            Err(err) => eprintln!("bad event json: {}", err),
        }
    }

    let cfg = ReplayConfig::from_config(&Config::from_env());
    if steps {
        for step in ReplaySteps::new(&rules, &events, &cfg) {
            println!("{}", serde_json::to_string(&step)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&replay(&rules, &events, &cfg))?);
    }
    Ok(())
}
