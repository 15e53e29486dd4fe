use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::backtest::HistoricalEvent;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::rules::RuleRecord;
use crate::storage::Store;

/// Local store. Timestamps are RFC3339 UTC with millisecond precision, so text
/// order is time order.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite store at {path}"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                rule_schema TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS historical_events (
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON historical_events(created_at);
            COMMIT;",
        )?;
        Ok(())
    }

    /// Insert or replace a rule by id.
    pub fn insert_rule(&self, record: &RuleRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO rules (id, name, status, rule_schema, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.name,
                record.status,
                record.rule_schema.to_string(),
                ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn insert_event(&self, event: &HistoricalEvent) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO historical_events (payload, created_at) VALUES (?1, ?2)",
            params![event.payload.to_string(), ts(&event.created_at)],
        )?;
        Ok(())
    }

    /// Bulk insert inside one transaction.
    pub fn insert_events(&self, events: &[HistoricalEvent]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO historical_events (payload, created_at) VALUES (?1, ?2)",
                params![event.payload.to_string(), ts(&event.created_at)],
            )?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn events(&self, sql: &str, limit: usize) -> Result<Vec<HistoricalEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (payload, created_at) = row?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .with_context(|| format!("bad event timestamp {created_at}"))?
                .with_timezone(&Utc);
            out.push(HistoricalEvent::new(event_payload(&payload, &created_at), created_at));
        }
        Ok(out)
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A payload that no longer parses loads as `Null`, which replays as an empty cart.
fn event_payload(raw: &str, created_at: &DateTime<Utc>) -> Value {
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log(
                Level::Warn,
                Domain::Store,
                "corrupt_event_payload",
                obj(&[("created_at", v_str(&ts(created_at))), ("error", v_str(&e.to_string()))]),
            );
            Value::Null
        }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RuleRecord> {
    let id: String = row.get(0)?;
    let raw: String = row.get(3)?;
    let rule_schema = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            log(
                Level::Warn,
                Domain::Store,
                "corrupt_rule_schema",
                obj(&[("rule_id", v_str(&id)), ("error", v_str(&e.to_string()))]),
            );
            Value::Null
        }
    };
    Ok(RuleRecord { id, name: row.get(1)?, status: row.get(2)?, rule_schema })
}

#[async_trait]
impl Store for SqliteStore {
    async fn active_rules(&self) -> Result<Vec<RuleRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, status, rule_schema FROM rules WHERE status = 'active' ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn rule(&self, id: &str) -> Result<Option<RuleRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, name, status, rule_schema FROM rules WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        self.events(
            "SELECT payload, created_at FROM historical_events ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            limit,
        )
    }

    async fn events_ascending(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        self.events(
            "SELECT payload, created_at FROM historical_events ORDER BY created_at ASC, rowid ASC LIMIT ?1",
            limit,
        )
    }

    async fn record_event(&self, payload: &Value) -> Result<()> {
        self.insert_event(&HistoricalEvent::new(payload.clone(), Utc::now()))
    }
}
