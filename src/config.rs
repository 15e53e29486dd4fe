use crate::facts::CartFactNames;
use crate::pricing::PricingPolicy;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// `sqlite` or `rest`.
    pub store: String,
    pub sqlite_path: String,
    pub rest_base: String,
    pub rest_api_key: Option<String>,
    pub history_window: usize,
    pub backtest_event_limit: usize,
    pub backtest_timeout_secs: u64,
    pub prefer_percentage: bool,
    /// Append each live payload to the event history after evaluating it.
    pub record_events: bool,
    pub value_fact: String,
    pub surge_fact: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: "sqlite".to_string(),
            sqlite_path: "./pricing.sqlite".to_string(),
            rest_base: "http://localhost:54321".to_string(),
            rest_api_key: None,
            history_window: 20,
            backtest_event_limit: 600,
            backtest_timeout_secs: 30,
            prefer_percentage: true,
            record_events: true,
            value_fact: "cartTotal".to_string(),
            surge_fact: "cartSurgeMetrics".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            store: std::env::var("STORE").unwrap_or(d.store),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            rest_base: std::env::var("REST_BASE").unwrap_or(d.rest_base),
            rest_api_key: std::env::var("REST_API_KEY").ok(),
            history_window: std::env::var("HISTORY_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(d.history_window),
            backtest_event_limit: std::env::var("BACKTEST_EVENT_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.backtest_event_limit),
            backtest_timeout_secs: std::env::var("BACKTEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.backtest_timeout_secs),
            prefer_percentage: std::env::var("PREFER_PERCENTAGE").ok().and_then(|v| parse_flag(&v)).unwrap_or(d.prefer_percentage),
            record_events: std::env::var("RECORD_EVENTS").ok().and_then(|v| parse_flag(&v)).unwrap_or(d.record_events),
            value_fact: std::env::var("VALUE_FACT").unwrap_or(d.value_fact),
            surge_fact: std::env::var("SURGE_FACT").unwrap_or(d.surge_fact),
        }
    }

    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy { prefer_percentage: self.prefer_percentage }
    }

    pub fn fact_names(&self) -> CartFactNames {
        CartFactNames { value: self.value_fact.clone(), surge: self.surge_fact.clone() }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
