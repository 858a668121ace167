//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Where finalized costs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostSourceKind {
    /// Estimate from token counts against the external price table.
    PriceTable,

    /// Poll the upstream spend-log endpoint.
    SpendLog,
}

impl FromStr for CostSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price_table" | "price-table" => Ok(Self::PriceTable),
            "spend_log" | "spend-log" => Ok(Self::SpendLog),
            other => Err(format!("unknown cost source '{other}'")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/tollgate").
    pub data_dir: String,

    /// Base URL of the upstream completion API.
    pub upstream_url: String,

    /// API key forwarded to the upstream, if any.
    pub upstream_api_key: Option<String>,

    /// Path suffixes under `/api` that are billable and relayed.
    pub billable_suffixes: Vec<String>,

    /// How finalized costs are resolved.
    pub cost_source: CostSourceKind,

    /// URL of the price table document (price-table cost source).
    pub price_table_url: String,

    /// Base URL of the spend-log endpoint (spend-log cost source);
    /// defaults to the upstream URL.
    pub spend_log_url: Option<String>,

    /// Spend-log polling attempts.
    pub spend_retries: u32,

    /// Initial spend-log backoff delay.
    pub spend_base_delay: Duration,

    /// USD value of one credit.
    pub credit_rate: Decimal,

    /// Minimum credits required at admission.
    pub min_credits: i64,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds. Applies to the wallet API only; the
    /// relay is exempt because streamed completions can outlive any
    /// sensible fixed timeout.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tollgate".into()),
            upstream_url: std::env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://localhost:4000".into()),
            upstream_api_key: std::env::var("UPSTREAM_API_KEY").ok(),
            billable_suffixes: std::env::var("BILLABLE_SUFFIXES")
                .unwrap_or_else(|_| "/chat/completions".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            cost_source: std::env::var("COST_SOURCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(CostSourceKind::PriceTable),
            price_table_url: std::env::var("PRICE_TABLE_URL").unwrap_or_else(|_| {
                "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json"
                    .into()
            }),
            spend_log_url: std::env::var("SPEND_LOG_URL").ok(),
            spend_retries: std::env::var("SPEND_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
            spend_base_delay: Duration::from_millis(
                std::env::var("SPEND_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            credit_rate: std::env::var("CREDIT_RATE")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or_else(tollgate_core::default_credit_rate),
            min_credits: std::env::var("MIN_CREDITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(tollgate_core::DEFAULT_MIN_CREDITS),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tollgate".into(),
            upstream_url: "http://localhost:4000".into(),
            upstream_api_key: None,
            billable_suffixes: vec!["/chat/completions".into()],
            cost_source: CostSourceKind::PriceTable,
            price_table_url:
                "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json"
                    .into(),
            spend_log_url: None,
            spend_retries: 6,
            spend_base_delay: Duration::from_millis(500),
            credit_rate: tollgate_core::default_credit_rate(),
            min_credits: tollgate_core::DEFAULT_MIN_CREDITS,
            service_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
