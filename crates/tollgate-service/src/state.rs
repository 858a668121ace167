//! Application state.

use std::sync::Arc;

use tollgate_meter::{BillingGate, CostSource, CreditLedger, PriceOracle, SpendLookup};
use tollgate_store::{RocksStore, Store};

use crate::config::{CostSourceKind, ServiceConfig};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// The billing gate wrapped around relayed requests.
    pub gate: BillingGate,

    /// The price oracle, when the price-table cost source is active.
    pub oracle: Option<Arc<PriceOracle>>,

    /// HTTP client for upstream relay calls.
    pub client: reqwest::Client,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let client = reqwest::Client::new();

        let ledger = CreditLedger::new(
            Arc::clone(&store) as Arc<dyn Store>,
            config.credit_rate,
        );

        let (cost, oracle) = match config.cost_source {
            CostSourceKind::PriceTable => {
                tracing::info!(url = %config.price_table_url, "price-table cost source");
                let oracle = Arc::new(PriceOracle::new(
                    client.clone(),
                    config.price_table_url.clone(),
                ));
                (CostSource::PriceTable(Arc::clone(&oracle)), Some(oracle))
            }
            CostSourceKind::SpendLog => {
                let base_url = config
                    .spend_log_url
                    .clone()
                    .unwrap_or_else(|| config.upstream_url.clone());
                tracing::info!(url = %base_url, "spend-log cost source");
                let lookup = SpendLookup::new(
                    client.clone(),
                    base_url,
                    config.upstream_api_key.clone(),
                    config.spend_retries,
                    config.spend_base_delay,
                );
                (CostSource::SpendLog(Arc::new(lookup)), None)
            }
        };

        if config.service_api_key.is_none() {
            tracing::warn!("no service API key configured, admin endpoints are disabled");
        }

        Self {
            store,
            gate: BillingGate::new(ledger, cost),
            oracle,
            client,
            config,
        }
    }
}
