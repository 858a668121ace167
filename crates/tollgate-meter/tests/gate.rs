//! End-to-end billing flow tests: admission, buffered and streaming
//! finalization, deferred ordering, and the spend-log cost path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tollgate_core::{BillingError, Plan, UserId, Wallet, WalletStatus};
use tollgate_meter::{
    BillingGate, CostSource, CreditLedger, PriceOracle, RelayBody, RelayResponse, RequestContext,
    SpendLookup,
};
use tollgate_store::{RocksStore, Store};

fn sheet() -> serde_json::Value {
    json!({
        "metered": {
            "input_cost_per_token": 0.000_001,
            "output_cost_per_token": 0.000_001,
        }
    })
}

async fn price_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sheet()))
        .mount(&server)
        .await;
    server
}

struct Harness {
    gate: BillingGate,
    store: Arc<RocksStore>,
    user_id: UserId,
    _dir: TempDir,
}

impl Harness {
    fn new(cost: CostSource, opening_balance: i64) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let user_id = UserId::generate();
        store
            .put_wallet(&Wallet::new(user_id, Plan::Pro, opening_balance, None))
            .unwrap();

        let ledger = CreditLedger::new(
            Arc::clone(&store) as Arc<dyn Store>,
            tollgate_core::default_credit_rate(),
        );
        Self {
            gate: BillingGate::new(ledger, cost),
            store,
            user_id,
            _dir: dir,
        }
    }

    async fn with_price_table(server: &MockServer, opening_balance: i64) -> Self {
        let oracle = PriceOracle::new(
            reqwest::Client::new(),
            format!("{}/prices.json", server.uri()),
        );
        Self::new(CostSource::PriceTable(Arc::new(oracle)), opening_balance)
    }

    fn balance(&self) -> i64 {
        self.store.get_wallet(&self.user_id).unwrap().unwrap().balance
    }
}

fn buffered_completion(id: &str, prompt: u64, completion: u64) -> RelayResponse {
    let body = json!({
        "id": id,
        "choices": [{"message": {"role": "assistant", "content": "ok"}}],
        "usage": {"prompt_tokens": prompt, "completion_tokens": completion},
    });
    RelayResponse::buffered(
        200,
        Some("application/json".to_string()),
        Bytes::from(body.to_string()),
    )
}

#[tokio::test]
async fn buffered_request_is_billed_once() {
    let server = price_server().await;
    let harness = Harness::with_price_table(&server, 100).await;
    let ctx = RequestContext::new(harness.user_id, "metered");

    // 100 tokens at 1e-6 USD each -> 0.0001 USD -> 1 credit.
    let response = harness
        .gate
        .intercept(ctx.clone(), || async {
            Ok(buffered_completion("chatcmpl-buf", 50, 50))
        })
        .await
        .unwrap();
    assert!(!response.is_streaming());
    assert_eq!(harness.balance(), 99);

    // Relaying the same upstream response again must not double-bill.
    harness
        .gate
        .intercept(ctx, || async {
            Ok(buffered_completion("chatcmpl-buf", 50, 50))
        })
        .await
        .unwrap();
    assert_eq!(harness.balance(), 99);
}

#[tokio::test]
async fn admission_denial_skips_the_upstream_call() {
    let server = price_server().await;
    let harness = Harness::with_price_table(&server, 100).await;

    let mut wallet = harness
        .store
        .get_wallet(&harness.user_id)
        .unwrap()
        .unwrap();
    wallet.status = WalletStatus::Grace;
    harness.store.put_wallet(&wallet).unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let err = harness
        .gate
        .intercept(RequestContext::new(harness.user_id, "metered"), || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(buffered_completion("chatcmpl-denied", 1, 1))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::SubscriptionInactive { .. }));
    assert!(err.is_admission_denied());
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(harness.balance(), 100);
}

#[tokio::test]
async fn streaming_request_forwards_chunks_and_defers_the_debit() {
    let server = price_server().await;
    let harness = Harness::with_price_table(&server, 100).await;

    let chunks: Vec<&str> = vec![
        "data: {\"id\": \"chatcmpl-str\", \"choices\": [{\"delta\": {\"content\": \"a\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"b\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"c\"}}]}\n\n",
        "data: {\"usage\": {\"prompt_tokens\": 100, \"completion_tokens\": 50}}\n\n",
        "data: [DONE]\n\n",
    ];
    let expected: Vec<Bytes> = chunks
        .iter()
        .map(|c| Bytes::from_static(c.as_bytes()))
        .collect();
    let upstream = futures::stream::iter(
        expected
            .clone()
            .into_iter()
            .map(Ok::<_, tollgate_meter::BoxError>),
    )
    .boxed();

    let mut response = harness
        .gate
        .intercept(RequestContext::new(harness.user_id, "metered"), || async {
            Ok(RelayResponse::streaming(
                200,
                Some("text/event-stream".to_string()),
                upstream,
            ))
        })
        .await
        .unwrap();
    assert!(response.is_streaming());

    // Nothing is billed until the stream drains.
    assert_eq!(harness.balance(), 100);

    let deferred = response.take_deferred();
    assert_eq!(deferred.len(), 1);

    let forwarded: Vec<Bytes> = match response.body {
        RelayBody::Stream(stream) => stream.map(|r| r.unwrap()).collect().await,
        RelayBody::Buffered(_) => panic!("expected a stream"),
    };
    assert_eq!(forwarded, expected);

    for task in deferred {
        task.await;
    }
    // 150 tokens at 1e-6 -> 0.00015 USD -> 1 credit.
    assert_eq!(harness.balance(), 99);
}

#[tokio::test]
async fn client_disconnect_still_finalizes_from_partial_capture() {
    let server = price_server().await;
    let harness = Harness::with_price_table(&server, 100).await;

    let chunks = vec![
        "data: {\"id\": \"chatcmpl-gone\", \"usage\": {\"prompt_tokens\": 200, \"completion_tokens\": 0}}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"never read\"}}]}\n\n",
    ];
    let upstream = futures::stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, tollgate_meter::BoxError>(Bytes::from_static(c.as_bytes()))),
    )
    .boxed();

    let mut response = harness
        .gate
        .intercept(RequestContext::new(harness.user_id, "metered"), || async {
            Ok(RelayResponse::streaming(200, None, upstream))
        })
        .await
        .unwrap();
    let deferred = response.take_deferred();

    // Read one chunk, then drop the body as a disconnecting client would.
    if let RelayBody::Stream(mut stream) = response.body {
        let _ = stream.next().await;
        drop(stream);
    }

    for task in deferred {
        task.await;
    }
    // 200 prompt tokens at 1e-6 -> 0.0002 USD -> 1 credit.
    assert_eq!(harness.balance(), 99);
}

#[tokio::test]
async fn deferred_tasks_run_in_registration_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut response = RelayResponse::buffered(200, None, Bytes::new());

    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        response.push_deferred(
            async move {
                // The later tasks finish sleeping sooner, so sequential
                // execution is the only way the order comes out right.
                let delay = match label {
                    "first" => 30,
                    "second" => 20,
                    _ => 10,
                };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                order.lock().unwrap().push(label);
            }
            .boxed(),
        );
    }

    for task in response.take_deferred() {
        task.await;
    }
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn spend_log_source_bills_from_the_ingested_spend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/spend/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/spend/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"spend": 0.0031}])))
        .mount(&server)
        .await;

    let lookup = SpendLookup::new(
        reqwest::Client::new(),
        server.uri(),
        None,
        5,
        Duration::from_millis(5),
    );
    let harness = Harness::new(CostSource::SpendLog(Arc::new(lookup)), 100);

    // Spend-log upstreams often omit the usage object; the id is enough.
    let body = json!({"id": "chatcmpl-spend", "choices": []});
    harness
        .gate
        .intercept(RequestContext::new(harness.user_id, "metered"), || async {
            Ok(RelayResponse::buffered(
                200,
                None,
                Bytes::from(body.to_string()),
            ))
        })
        .await
        .unwrap();

    // 0.0031 / 0.0015 -> 3 credits.
    assert_eq!(harness.balance(), 97);
}

#[tokio::test]
async fn price_fetch_failure_degrades_to_a_zero_debit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let harness = Harness::with_price_table(&server, 100).await;

    harness
        .gate
        .intercept(RequestContext::new(harness.user_id, "metered"), || async {
            Ok(buffered_completion("chatcmpl-nofetch", 50, 50))
        })
        .await
        .unwrap();

    // The request succeeds, the debit is zero, and the row still lands so
    // a later replay cannot charge either.
    assert_eq!(harness.balance(), 100);
    let txs = harness
        .store
        .list_transactions_by_user(&harness.user_id, 10, 0)
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].delta, 0);
    assert_eq!(txs[0].usd_spend, Decimal::ZERO);
}
