//! Error types for tollgate.

use crate::ids::IdError;

/// Result type for tollgate operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in tollgate billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Subscription is not active (grace or expired status).
    #[error("subscription inactive for user {user_id}")]
    SubscriptionInactive {
        /// The affected user.
        user_id: String,
    },

    /// Subscription period has ended.
    #[error("subscription period ended at {period_end}")]
    SubscriptionExpired {
        /// When the period ended (RFC 3339).
        period_end: String,
    },

    /// Insufficient credits for the operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required credits.
        required: i64,
    },

    /// Wallet not found.
    #[error("wallet not found: {user_id}")]
    AccountNotFound {
        /// The user id that was not found.
        user_id: String,
    },

    /// Model absent from the price table.
    #[error("model '{model}' not found in price table")]
    UnknownModel {
        /// The model that was looked up.
        model: String,
    },

    /// Price table entry is missing a required rate field.
    #[error("price entry for '{model}' missing or malformed field '{field}'")]
    MalformedPriceEntry {
        /// The model whose entry is malformed.
        model: String,
        /// The missing or malformed field.
        field: &'static str,
    },

    /// Fetching the price table failed.
    #[error("price table fetch failed: {0}")]
    PriceFetch(String),

    /// Upstream API call failed.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl BillingError {
    /// Whether this error denies admission before the billable operation
    /// runs (surfaced to callers as a payment-required failure).
    #[must_use]
    pub const fn is_admission_denied(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionInactive { .. }
                | Self::SubscriptionExpired { .. }
                | Self::InsufficientCredits { .. }
        )
    }
}
