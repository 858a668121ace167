//! The billing interceptor wrapped around each billable operation.
//!
//! [`BillingGate::intercept`] runs admission checks, executes the relayed
//! operation, and arranges finalization: inline for buffered responses,
//! deferred until the stream drains for streaming ones. Finalization never
//! fails the client-visible request; billing errors after the upstream call
//! are logged and dropped.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use rust_decimal::Decimal;

use tollgate_core::{BillableUsage, Result, TransactionId, UserId, DEFAULT_MIN_CREDITS};

use crate::ledger::{CreditLedger, DebitOutcome};
use crate::price::PriceOracle;
use crate::spend::SpendLookup;
use crate::usage::{extract_buffered, CaptureStream, UsageCapture};

/// Boxed error for relayed body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A relayed body chunk stream.
pub type ChunkStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// Work scheduled to run after the response is handed to the client.
pub type DeferredTask = BoxFuture<'static, ()>;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Billing context for one relayed request.
#[derive(Clone)]
pub struct RequestContext {
    /// The user being billed.
    pub user_id: UserId,

    /// Model the request targets (used for cost estimation and attribution).
    pub model: String,

    /// Minimum credits required at admission.
    pub min_credits: i64,
}

impl RequestContext {
    /// Create a context with the default admission minimum.
    #[must_use]
    pub fn new(user_id: UserId, model: impl Into<String>) -> Self {
        Self {
            user_id,
            model: model.into(),
            min_credits: DEFAULT_MIN_CREDITS,
        }
    }
}

/// The body of a relayed upstream response.
pub enum RelayBody {
    /// Fully buffered body.
    Buffered(Bytes),

    /// Streaming body, forwarded chunk by chunk.
    Stream(ChunkStream),
}

/// A relayed upstream response plus any deferred billing work.
pub struct RelayResponse {
    /// Upstream HTTP status.
    pub status: u16,

    /// Upstream content type, if any.
    pub content_type: Option<String>,

    /// Response body.
    pub body: RelayBody,

    deferred: Vec<DeferredTask>,
}

impl std::fmt::Debug for RelayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl RelayResponse {
    /// Create a buffered response.
    #[must_use]
    pub fn buffered(status: u16, content_type: Option<String>, body: Bytes) -> Self {
        Self {
            status,
            content_type,
            body: RelayBody::Buffered(body),
            deferred: Vec::new(),
        }
    }

    /// Create a streaming response.
    #[must_use]
    pub fn streaming(status: u16, content_type: Option<String>, stream: ChunkStream) -> Self {
        Self {
            status,
            content_type,
            body: RelayBody::Stream(stream),
            deferred: Vec::new(),
        }
    }

    /// Whether the body is streamed.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, RelayBody::Stream(_))
    }

    /// Schedule work to run after the response is handed off.
    pub fn push_deferred(&mut self, task: DeferredTask) {
        self.deferred.push(task);
    }

    /// Take the deferred tasks, leaving none behind.
    pub fn take_deferred(&mut self) -> Vec<DeferredTask> {
        std::mem::take(&mut self.deferred)
    }

    /// Spawn a driver that runs the deferred tasks in registration order.
    pub fn spawn_deferred(&mut self) {
        let tasks = self.take_deferred();
        if tasks.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for task in tasks {
                task.await;
            }
        });
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Where finalized costs come from.
#[derive(Clone)]
pub enum CostSource {
    /// Estimate from token counts against the cached price table.
    PriceTable(Arc<PriceOracle>),

    /// Poll the upstream spend log for the request's USD spend.
    SpendLog(Arc<SpendLookup>),
}

/// Admission gate and finalization driver for billable operations.
#[derive(Clone)]
pub struct BillingGate {
    ledger: CreditLedger,
    cost: CostSource,
}

impl BillingGate {
    /// Create a gate debiting through `ledger` and costing via `cost`.
    #[must_use]
    pub fn new(ledger: CreditLedger, cost: CostSource) -> Self {
        Self { ledger, cost }
    }

    /// The ledger this gate debits through.
    #[must_use]
    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Run a billable operation behind the admission gate.
    ///
    /// Eligibility is checked before `op` runs; an admission failure means
    /// the upstream is never called. Buffered responses are finalized
    /// inline. Streaming responses are wrapped in a pass-through capture
    /// and finalized by a deferred task once the stream drains (or the
    /// client disconnects).
    ///
    /// # Errors
    ///
    /// Returns admission errors from the eligibility check and whatever
    /// `op` itself returns. Finalization errors are logged, never returned.
    pub async fn intercept<F, Fut>(&self, ctx: RequestContext, op: F) -> Result<RelayResponse>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<RelayResponse>>,
    {
        self.ledger.check_eligibility(&ctx.user_id, ctx.min_credits)?;

        let mut response = op().await?;
        let body = std::mem::replace(&mut response.body, RelayBody::Buffered(Bytes::new()));
        match body {
            RelayBody::Buffered(bytes) => {
                if let Some(usage) = extract_buffered(&bytes) {
                    self.finalize(&ctx, usage).await;
                } else {
                    tracing::debug!(
                        model = %ctx.model,
                        "no billable usage in buffered response"
                    );
                }
                response.body = RelayBody::Buffered(bytes);
            }
            RelayBody::Stream(stream) => {
                let (capture, rx) = CaptureStream::new(stream);
                response.body = RelayBody::Stream(Box::pin(capture));

                let gate = self.clone();
                let ctx = ctx.clone();
                response.push_deferred(
                    async move {
                        match rx.await {
                            Ok(capture) => gate.finalize_capture(&ctx, capture).await,
                            Err(_) => tracing::warn!(
                                model = %ctx.model,
                                "capture channel closed before finalization"
                            ),
                        }
                    }
                    .boxed(),
                );
            }
        }
        Ok(response)
    }

    async fn finalize_capture(&self, ctx: &RequestContext, capture: UsageCapture) {
        match capture.into_billable() {
            Some(usage) => self.finalize(ctx, usage).await,
            None => tracing::info!(
                user_id = %ctx.user_id,
                model = %ctx.model,
                "stream ended without a request id, nothing to bill"
            ),
        }
    }

    /// Cost the usage and debit the ledger. Failures are logged only.
    async fn finalize(&self, ctx: &RequestContext, usage: BillableUsage) {
        let usd_spend = self.resolve_cost(ctx, &usage).await;

        let tx_id = match TransactionId::from_request_id(usage.request_id.as_str()) {
            Ok(tx_id) => tx_id,
            Err(e) => {
                tracing::warn!(error = %e, "unusable upstream request id, skipping debit");
                return;
            }
        };

        match self
            .ledger
            .record_and_debit(ctx.user_id, tx_id, usd_spend, &ctx.model)
        {
            Ok(DebitOutcome::Applied { .. } | DebitOutcome::AlreadyRecorded) => {}
            Err(e) => {
                // The client already has its response; the debit is not
                // retried.
                tracing::error!(
                    user_id = %ctx.user_id,
                    request_id = %usage.request_id,
                    error = %e,
                    "usage debit failed"
                );
            }
        }
    }

    /// Resolve the USD cost for captured usage, falling back to zero.
    async fn resolve_cost(&self, ctx: &RequestContext, usage: &BillableUsage) -> Decimal {
        match &self.cost {
            CostSource::PriceTable(oracle) => {
                match oracle
                    .estimate(&ctx.model, usage.prompt_tokens, usage.completion_tokens)
                    .await
                {
                    Ok(cost) => cost,
                    Err(e) => {
                        tracing::warn!(
                            model = %ctx.model,
                            error = %e,
                            "cost estimation failed, billing zero"
                        );
                        Decimal::ZERO
                    }
                }
            }
            CostSource::SpendLog(lookup) => {
                match lookup.lookup_with_retry(&usage.request_id).await {
                    Some(spend) => spend,
                    None => {
                        tracing::warn!(
                            request_id = %usage.request_id,
                            "spend log never ingested the request, billing zero"
                        );
                        Decimal::ZERO
                    }
                }
            }
        }
    }
}
