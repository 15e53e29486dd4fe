//! Where rules and historical events live.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::backtest::HistoricalEvent;
use crate::config::Config;
use crate::rules::RuleRecord;

pub mod memory;
pub mod rest;
pub mod retry;
pub mod sqlite;

pub use memory::MemoryStore;
pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Rest,
}

impl StoreKind {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("STORE").unwrap_or_else(|_| "sqlite".to_string()))
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "rest" | "postgrest" | "supabase" => StoreKind::Rest,
            _ => StoreKind::Sqlite,
        }
    }

    pub fn build(self, cfg: &Config) -> Result<Arc<dyn Store>> {
        match self {
            StoreKind::Sqlite => {
                let store = SqliteStore::open(&cfg.sqlite_path)?;
                store.init()?;
                Ok(Arc::new(store))
            }
            StoreKind::Rest => Ok(Arc::new(RestStore::new(cfg)?)),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Records with status `active`, in creation order.
    async fn active_rules(&self) -> Result<Vec<RuleRecord>>;
    async fn rule(&self, id: &str) -> Result<Option<RuleRecord>>;
    /// Newest first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<HistoricalEvent>>;
    /// Oldest first.
    async fn events_ascending(&self, limit: usize) -> Result<Vec<HistoricalEvent>>;
    async fn record_event(&self, payload: &Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(StoreKind::parse("REST"), StoreKind::Rest);
        assert_eq!(StoreKind::parse("sqlite"), StoreKind::Sqlite);
        assert_eq!(StoreKind::parse("other"), StoreKind::Sqlite);
    }
}
