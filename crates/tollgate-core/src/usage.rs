//! Billable usage captured from upstream responses.

use serde::{Deserialize, Serialize};

/// Token counters as they appear in an upstream `usage` object.
///
/// Fields default to zero so partial usage objects (some providers omit one
/// side) still deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Prompt (input) tokens.
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Completion (output) tokens.
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Usage extracted from one billable upstream response.
///
/// `request_id` is the upstream request identifier; it becomes the ledger
/// transaction id for the debit, so one logical request can only ever be
/// billed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableUsage {
    /// Upstream request id.
    pub request_id: String,

    /// Prompt tokens consumed.
    pub prompt_tokens: u64,

    /// Completion tokens produced.
    pub completion_tokens: u64,
}

impl BillableUsage {
    /// Combine a request id with captured token counters.
    #[must_use]
    pub fn new(request_id: impl Into<String>, counts: TokenCounts) -> Self {
        Self {
            request_id: request_id.into(),
            prompt_tokens: counts.prompt_tokens,
            completion_tokens: counts.completion_tokens,
        }
    }
}
