//! Usage metering core for tollgate.
//!
//! This crate converts raw upstream usage (tokens, USD spend) into credit
//! debits against a per-user ledger, exactly once per billable request:
//!
//! - [`price`] — the cost oracle: an externally sourced, single-flight
//!   cached price table and exact-decimal cost estimation
//! - [`usage`] — usage extraction from buffered bodies and from SSE chunk
//!   streams (pass-through capture)
//! - [`ledger`] — the credit ledger: admission eligibility, idempotent
//!   record-and-debit, credit grants
//! - [`spend`] — the alternate cost path: polling an eventually-consistent
//!   spend-log endpoint with exponential backoff
//! - [`gate`] — the billing interceptor tying it together around each
//!   billable operation
//!
//! # Billing flow
//!
//! ```text
//! gate.intercept ── check_eligibility ── op() ──┬─ buffered: extract → estimate → record_and_debit
//!                                               └─ streaming: CaptureStream → (after drain) finalize
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod gate;
pub mod ledger;
pub mod price;
pub mod spend;
pub mod usage;

pub use gate::{
    BillingGate, BoxError, ChunkStream, CostSource, DeferredTask, RelayBody, RelayResponse,
    RequestContext,
};
pub use ledger::{CreditLedger, DebitOutcome};
pub use price::{PriceOracle, PriceTable};
pub use spend::SpendLookup;
pub use usage::{extract_buffered, CaptureStream, UsageCapture};
