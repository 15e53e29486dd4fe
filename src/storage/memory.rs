use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::backtest::HistoricalEvent;
use crate::rules::RuleRecord;
use crate::storage::Store;

/// In-process store for tests and offline tools.
#[derive(Default)]
pub struct MemoryStore {
    rules: RwLock<Vec<RuleRecord>>,
    events: RwLock<Vec<HistoricalEvent>>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new(rules: Vec<RuleRecord>, events: Vec<HistoricalEvent>) -> Self {
        Self { rules: RwLock::new(rules), events: RwLock::new(events), unavailable: false }
    }

    /// A store whose every call fails, for exercising fatal store errors.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    pub fn events(&self) -> Vec<HistoricalEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            bail!("store unavailable");
        }
        Ok(())
    }

    fn sorted_events(&self) -> Result<Vec<HistoricalEvent>> {
        self.check()?;
        let mut events = self.events.read().map_err(|_| anyhow!("event lock poisoned"))?.clone();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_rules(&self) -> Result<Vec<RuleRecord>> {
        self.check()?;
        let rules = self.rules.read().map_err(|_| anyhow!("rule lock poisoned"))?;
        Ok(rules.iter().filter(|r| r.is_active()).cloned().collect())
    }

    async fn rule(&self, id: &str) -> Result<Option<RuleRecord>> {
        self.check()?;
        let rules = self.rules.read().map_err(|_| anyhow!("rule lock poisoned"))?;
        Ok(rules.iter().find(|r| r.id == id).cloned())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        let mut events = self.sorted_events()?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    async fn events_ascending(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        let mut events = self.sorted_events()?;
        events.truncate(limit);
        Ok(events)
    }

    async fn record_event(&self, payload: &Value) -> Result<()> {
        self.check()?;
        self.events
            .write()
            .map_err(|_| anyhow!("event lock poisoned"))?
            .push(HistoricalEvent::new(payload.clone(), Utc::now()));
        Ok(())
    }
}
