//! Spend-log cost lookup with retry and exponential backoff.
//!
//! Some upstreams report per-request USD spend through an eventually
//! consistent log endpoint instead of token counts in the response. The
//! lookup polls `GET {base}/spend/logs?request_id=...` until the entry is
//! ingested, doubling the delay between attempts. Exhausting retries yields
//! `None` (the caller bills zero rather than failing the request).

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::price::decimal_from_value;

/// Poller for an eventually consistent spend-log endpoint.
pub struct SpendLookup {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    base_delay: Duration,
}

impl SpendLookup {
    /// Create a lookup against `base_url`.
    ///
    /// `retries` attempts are made with delays of `base_delay`,
    /// `2 * base_delay`, `4 * base_delay`, ... between them.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            retries,
            base_delay,
        }
    }

    /// Fetch the spend for a request id once, without retrying.
    ///
    /// Returns `None` when the entry is not ingested yet, when the request
    /// fails, or when the response does not carry a usable spend value.
    pub async fn lookup(&self, request_id: &str) -> Option<Decimal> {
        let url = format!("{}/spend/logs", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("request_id", request_id)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id, error = %e, "spend log request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(
                request_id,
                status = response.status().as_u16(),
                "spend log request rejected"
            );
            return None;
        }

        let doc: Value = match response.json().await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(request_id, error = %e, "spend log body is not valid JSON");
                return None;
            }
        };
        let entry = doc.as_array()?.first()?;
        decimal_from_value(entry.get("spend")?)
    }

    /// Fetch the spend for a request id, retrying with backoff.
    pub async fn lookup_with_retry(&self, request_id: &str) -> Option<Decimal> {
        let mut delay = self.base_delay;
        for attempt in 0..self.retries {
            if let Some(spend) = self.lookup(request_id).await {
                tracing::debug!(request_id, attempt, spend = %spend, "spend log entry found");
                return Some(spend);
            }
            tracing::debug!(
                request_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "spend not ingested yet, backing off"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_reads_first_entry_spend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .and(query_param("request_id", "chatcmpl-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"request_id": "chatcmpl-1", "spend": 0.0123},
                {"request_id": "chatcmpl-1", "spend": 99.0}
            ])))
            .mount(&server)
            .await;

        let lookup = SpendLookup::new(
            reqwest::Client::new(),
            server.uri(),
            None,
            3,
            Duration::from_millis(5),
        );
        let spend = lookup.lookup("chatcmpl-1").await.unwrap();
        assert_eq!(spend, Decimal::from_str("0.0123").unwrap());
    }

    #[tokio::test]
    async fn lookup_returns_none_for_empty_log() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let lookup = SpendLookup::new(
            reqwest::Client::new(),
            server.uri(),
            None,
            3,
            Duration::from_millis(5),
        );
        assert!(lookup.lookup("chatcmpl-x").await.is_none());
    }

    #[tokio::test]
    async fn retry_backs_off_until_ingested() {
        let server = MockServer::start().await;
        // First three polls see an empty log, the fourth finds the entry.
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"spend": "0.004"}])),
            )
            .mount(&server)
            .await;

        let lookup = SpendLookup::new(
            reqwest::Client::new(),
            server.uri(),
            None,
            10,
            Duration::from_millis(20),
        );

        let started = Instant::now();
        let spend = lookup.lookup_with_retry("chatcmpl-late").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(spend, Decimal::from_str("0.004").unwrap());
        // Three backoffs: 20ms + 40ms + 80ms.
        assert!(
            elapsed >= Duration::from_millis(140),
            "elapsed only {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn retry_exhaustion_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let lookup = SpendLookup::new(
            reqwest::Client::new(),
            server.uri(),
            None,
            2,
            Duration::from_millis(5),
        );
        assert!(lookup.lookup_with_retry("chatcmpl-never").await.is_none());
    }

    #[tokio::test]
    async fn api_key_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spend/logs"))
            .and(wiremock::matchers::header(
                "authorization",
                "Bearer sk-spend",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"spend": 0.001}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let lookup = SpendLookup::new(
            reqwest::Client::new(),
            server.uri(),
            Some("sk-spend".to_string()),
            1,
            Duration::from_millis(5),
        );
        assert!(lookup.lookup("chatcmpl-auth").await.is_some());
    }
}
