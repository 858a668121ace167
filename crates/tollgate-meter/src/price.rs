//! Cost oracle backed by an externally sourced price table.
//!
//! The price table is a JSON object mapping model names to per-token USD
//! rates, fetched from a configurable URL. The fetch is cached with
//! single-flight semantics: concurrent callers on a cold cache share one
//! in-flight request, and the table stays cached until explicitly
//! invalidated.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Mutex;

use tollgate_core::{BillingError, Result};

// =============================================================================
// Price Table
// =============================================================================

/// A snapshot of per-model USD rates.
///
/// Model names are normalized (trimmed, lowercased) at load time; lookups
/// normalize the same way.
#[derive(Debug)]
pub struct PriceTable {
    entries: HashMap<String, Value>,
}

/// Per-token USD rates for a single model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRates {
    /// USD cost per prompt token.
    pub input_cost_per_token: Decimal,
    /// USD cost per completion token.
    pub output_cost_per_token: Decimal,
}

impl PriceTable {
    /// Build a table from the raw JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::PriceFetch`] if the document is not a JSON
    /// object.
    pub fn from_json(doc: Value) -> Result<Self> {
        let Value::Object(map) = doc else {
            return Err(BillingError::PriceFetch(
                "price table document is not a JSON object".to_string(),
            ));
        };

        let entries = map
            .into_iter()
            .map(|(model, entry)| (normalize_model(&model), entry))
            .collect();
        Ok(Self { entries })
    }

    /// Number of models in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the per-token rates for a model.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::UnknownModel`] if the model has no entry and
    /// [`BillingError::MalformedPriceEntry`] if an entry is missing a rate
    /// field or carries one that does not parse as a decimal.
    pub fn rates(&self, model: &str) -> Result<ModelRates> {
        let normalized = normalize_model(model);
        let entry = self
            .entries
            .get(&normalized)
            .ok_or_else(|| BillingError::UnknownModel {
                model: normalized.clone(),
            })?;

        let input_cost_per_token = rate_field(entry, &normalized, "input_cost_per_token")?;
        let output_cost_per_token = rate_field(entry, &normalized, "output_cost_per_token")?;
        Ok(ModelRates {
            input_cost_per_token,
            output_cost_per_token,
        })
    }
}

fn normalize_model(model: &str) -> String {
    model.trim().to_ascii_lowercase()
}

fn rate_field(entry: &Value, model: &str, field: &'static str) -> Result<Decimal> {
    let raw = entry
        .get(field)
        .ok_or_else(|| BillingError::MalformedPriceEntry {
            model: model.to_string(),
            field,
        })?;
    decimal_from_value(raw).ok_or_else(|| BillingError::MalformedPriceEntry {
        model: model.to_string(),
        field,
    })
}

/// Parse a JSON value as an exact decimal.
///
/// Accepts numbers and strings. Numbers go through their textual form so
/// tiny per-token rates like `2.5e-6` survive without binary-float
/// rounding.
pub(crate) fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    use std::str::FromStr;
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

// =============================================================================
// Oracle
// =============================================================================

type FetchResult = std::result::Result<Arc<PriceTable>, String>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

enum CacheState {
    Empty,
    Fetching(SharedFetch),
    Ready(Arc<PriceTable>),
}

/// Single-flight cached price table with exact-decimal cost estimation.
pub struct PriceOracle {
    client: reqwest::Client,
    url: String,
    state: Mutex<CacheState>,
}

impl PriceOracle {
    /// Create an oracle fetching its table from `url`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            state: Mutex::new(CacheState::Empty),
        }
    }

    /// Estimate the USD cost for a token count pair.
    ///
    /// `prompt_tokens * input_rate + completion_tokens * output_rate`,
    /// computed in exact decimal arithmetic.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::PriceFetch`] if the table cannot be fetched,
    /// [`BillingError::UnknownModel`] for models without an entry, and
    /// [`BillingError::MalformedPriceEntry`] for unusable entries.
    pub async fn estimate(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Result<Decimal> {
        let table = self.table().await?;
        let rates = table.rates(model)?;
        Ok(Decimal::from(prompt_tokens) * rates.input_cost_per_token
            + Decimal::from(completion_tokens) * rates.output_cost_per_token)
    }

    /// Drop the cached table so the next estimate refetches.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = CacheState::Empty;
        tracing::info!("price table invalidated");
    }

    /// Get the current table, fetching it if necessary.
    ///
    /// Concurrent callers on a cold cache share a single fetch. A failed
    /// fetch resets the cache so the next caller retries.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::PriceFetch`] if the fetch fails.
    pub async fn table(&self) -> Result<Arc<PriceTable>> {
        let fetch = {
            let mut state = self.state.lock().await;
            match &*state {
                CacheState::Ready(table) => return Ok(Arc::clone(table)),
                CacheState::Fetching(fetch) => fetch.clone(),
                CacheState::Empty => {
                    let client = self.client.clone();
                    let url = self.url.clone();
                    let fetch = fetch_table(client, url).boxed().shared();
                    *state = CacheState::Fetching(fetch.clone());
                    fetch
                }
            }
        };

        // Only the fetch still registered in the cache may publish its
        // result. If invalidate() ran while this fetch was in flight, the
        // registered handle is a newer one and this table is stale.
        match fetch.clone().await {
            Ok(table) => {
                let mut state = self.state.lock().await;
                if let CacheState::Fetching(current) = &*state {
                    if current.ptr_eq(&fetch) {
                        *state = CacheState::Ready(Arc::clone(&table));
                    }
                }
                Ok(table)
            }
            Err(message) => {
                let mut state = self.state.lock().await;
                if let CacheState::Fetching(current) = &*state {
                    if current.ptr_eq(&fetch) {
                        *state = CacheState::Empty;
                    }
                }
                Err(BillingError::PriceFetch(message))
            }
        }
    }
}

async fn fetch_table(client: reqwest::Client, url: String) -> FetchResult {
    tracing::debug!(%url, "fetching price table");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("price table request failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("price table request failed: {e}"))?;

    let doc: Value = response
        .json()
        .await
        .map_err(|e| format!("price table body is not valid JSON: {e}"))?;

    let table = PriceTable::from_json(doc).map_err(|e| e.to_string())?;
    tracing::info!(models = table.len(), "price table loaded");
    Ok(Arc::new(table))
}
