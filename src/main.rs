use std::io::{self, Read};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use pricing_engine::backtest::HistoricalEvent;
use pricing_engine::config::Config;
use pricing_engine::logging::{log, obj, run_id, v_str, Domain, Level};
use pricing_engine::rules::RuleRecord;
use pricing_engine::service::{BacktestTarget, PricingService};
use pricing_engine::storage::{SqliteStore, StoreKind};

const USAGE: &str = "usage: pricing-engine <command>

  init                           create the local sqlite schema
  import-rules <file.json>       load rule records (array or single object)
  import-events <file.jsonl>     load historical events, one per line
  evaluate [payload.json|-]      evaluate a cart payload against active rules
  backtest [draft.json] [--limit N]
                                 replay a draft rule (or all active rules)
  blast-radius <rule_id>         rules sharing facts with <rule_id>
  facts                          fact usage across active rules";

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("read {p}")),
    }
}

fn read_json(path: Option<&str>) -> Result<Value> {
    let raw = read_input(path)?;
    serde_json::from_str(&raw).context("parse JSON input")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn local_store(cfg: &Config) -> Result<SqliteStore> {
    if StoreKind::parse(&cfg.store) != StoreKind::Sqlite {
        bail!("this command only works against the local sqlite store (STORE={})", cfg.store);
    }
    let store = SqliteStore::open(&cfg.sqlite_path)?;
    store.init()?;
    Ok(store)
}

fn parse_limit(args: &[String]) -> Result<(Option<&str>, Option<usize>)> {
    let mut path = None;
    let mut limit = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg == "--limit" {
            let n = it.next().ok_or_else(|| anyhow!("--limit needs a value"))?;
            limit = Some(n.parse().with_context(|| format!("bad --limit {n}"))?);
        } else {
            path = Some(arg.as_str());
        }
    }
    Ok((path, limit))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let rest = &args[1..];
    let cfg = Config::from_env();

    log(
        Level::Info,
        Domain::System,
        "start",
        obj(&[("command", v_str(command)), ("store", v_str(&cfg.store)), ("run", v_str(run_id()))]),
    );

    match command.as_str() {
        "init" => {
            local_store(&cfg)?;
            println!("initialized {}", cfg.sqlite_path);
        }
        "import-rules" => {
            let store = local_store(&cfg)?;
            let records: Vec<RuleRecord> = match read_json(rest.first().map(String::as_str))? {
                Value::Array(items) => items
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<_, _>>()
                    .context("parse rule records")?,
                single => vec![serde_json::from_value(single).context("parse rule record")?],
            };
            for record in &records {
                store.insert_rule(record)?;
            }
            println!("imported {} rules", records.len());
        }
        "import-events" => {
            let store = local_store(&cfg)?;
            let raw = read_input(rest.first().map(String::as_str))?;
            let mut events = Vec::new();
            for (n, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: HistoricalEvent =
                    serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
                events.push(event);
            }
            let count = store.insert_events(&events)?;
            println!("imported {count} events");
        }
        "evaluate" => {
            let payload = read_json(rest.first().map(String::as_str))?;
            let svc = PricingService::new(StoreKind::parse(&cfg.store).build(&cfg)?, cfg);
            print_json(&svc.evaluate(&payload).await?)?;
        }
        "backtest" => {
            let (path, limit) = parse_limit(rest)?;
            let target = match path {
                Some(p) => BacktestTarget::Draft(read_json(Some(p))?),
                None => BacktestTarget::Active,
            };
            let svc = PricingService::new(StoreKind::parse(&cfg.store).build(&cfg)?, cfg);
            print_json(&svc.backtest(target, limit).await?)?;
        }
        "blast-radius" => {
            let id = rest.first().ok_or_else(|| anyhow!("blast-radius needs a rule id"))?;
            let svc = PricingService::new(StoreKind::parse(&cfg.store).build(&cfg)?, cfg);
            match svc.blast_radius(id).await? {
                Some(report) => print_json(&report)?,
                None => bail!("rule {id} not found"),
            }
        }
        "facts" => {
            let svc = PricingService::new(StoreKind::parse(&cfg.store).build(&cfg)?, cfg);
            print_json(&svc.fact_usage().await?)?;
        }
        other => {
            eprintln!("unknown command `{other}`\n\n{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
