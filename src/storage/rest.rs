use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::Duration;
use url::Url;

use crate::backtest::HistoricalEvent;
use crate::config::Config;
use crate::rules::RuleRecord;
use crate::storage::retry::{is_retryable_http_error, retry_async, Permanent, RetryConfig};
use crate::storage::Store;

const RULE_COLUMNS: &str = "id,name,status,rule_schema";
const EVENT_COLUMNS: &str = "payload,created_at";

/// PostgREST-style managed database (`rules` and `historical_events` tables).
pub struct RestStore {
    client: Client,
    base: Url,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl RestStore {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut base = cfg.rest_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .and_then(|u| u.join("rest/v1/"))
            .with_context(|| format!("invalid REST_BASE {}", cfg.rest_base))?;
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            base,
            api_key: cfg.rest_api_key.clone(),
            retry: RetryConfig::default(),
        })
    }

    fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base.join(table)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, op: &str, url: Url) -> Result<T> {
        retry_async(&self.retry, op, || {
            let req = self.authed(self.client.get(url.clone()));
            async move {
                let resp = req.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    let msg = format!("{status}: {body}");
                    return Err(if is_retryable_http_error(status.as_u16()) {
                        anyhow!(msg)
                    } else {
                        Permanent(msg).into()
                    });
                }
                Ok(resp.json::<T>().await?)
            }
        })
        .await
        .with_context(|| format!("{op} failed"))
    }

    async fn events(&self, order: &str, limit: usize) -> Result<Vec<HistoricalEvent>> {
        let url = self.table_url(
            "historical_events",
            &[
                ("select", EVENT_COLUMNS.to_string()),
                ("order", format!("created_at.{order}")),
                ("limit", limit.to_string()),
            ],
        )?;
        self.get_json("fetch_events", url).await
    }
}

#[async_trait]
impl Store for RestStore {
    async fn active_rules(&self) -> Result<Vec<RuleRecord>> {
        let url = self.table_url(
            "rules",
            &[
                ("select", RULE_COLUMNS.to_string()),
                ("status", "eq.active".to_string()),
                ("order", "created_at.asc".to_string()),
            ],
        )?;
        self.get_json("fetch_active_rules", url).await
    }

    async fn rule(&self, id: &str) -> Result<Option<RuleRecord>> {
        let url = self.table_url(
            "rules",
            &[("select", RULE_COLUMNS.to_string()), ("id", format!("eq.{id}")), ("limit", "1".to_string())],
        )?;
        let rows: Vec<RuleRecord> = self.get_json("fetch_rule", url).await?;
        Ok(rows.into_iter().next())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        self.events("desc", limit).await
    }

    async fn events_ascending(&self, limit: usize) -> Result<Vec<HistoricalEvent>> {
        self.events("asc", limit).await
    }

    async fn record_event(&self, payload: &Value) -> Result<()> {
        let url = self.table_url("historical_events", &[])?;
        let body = json!({ "payload": payload });
        retry_async(&self.retry, "record_event", || {
            let req = self
                .authed(self.client.post(url.clone()))
                .header("Prefer", "return=minimal")
                .json(&body);
            async move {
                let resp = req.send().await?;
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else if is_retryable_http_error(status.as_u16()) {
                    Err(anyhow!("record_event: {status}"))
                } else {
                    Err(Permanent(format!("record_event: {status}")).into())
                }
            }
        })
        .await
    }
}
