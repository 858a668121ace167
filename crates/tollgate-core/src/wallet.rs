//! Wallet types for tollgate.
//!
//! A wallet is the per-user account ledger entry: credit balance,
//! subscription plan, and billing-period state. Wallets are created when a
//! user is first provisioned and are never deleted; expiry is a status
//! change, not a row removal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A per-user credit wallet.
///
/// The balance is signed: two concurrent requests can each pass the
/// admission gate against the same balance and both debit afterwards, so a
/// wallet may briefly go negative. That race is an accepted trade-off; the
/// gate denies any further requests once the balance is below the minimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// The user this wallet belongs to.
    pub user_id: UserId,

    /// Subscription plan.
    pub plan: Plan,

    /// Current credit balance (signed).
    pub balance: i64,

    /// Monthly credit allowance for the plan.
    pub monthly_quota: i64,

    /// End of the current subscription period, if the plan is periodic.
    pub period_end: Option<DateTime<Utc>>,

    /// Subscription status.
    pub status: WalletStatus,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new wallet with the plan's monthly quota as the opening
    /// balance.
    #[must_use]
    pub fn new(
        user_id: UserId,
        plan: Plan,
        monthly_quota: i64,
        period_end: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            plan,
            balance: monthly_quota,
            monthly_quota,
            period_end,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the wallet has at least `min_credits` available.
    #[must_use]
    pub fn has_sufficient_credits(&self, min_credits: i64) -> bool {
        self.balance >= min_credits
    }

    /// Check whether the subscription period has ended as of `now`.
    ///
    /// Wallets without a period end (pay-as-you-go) never expire this way.
    #[must_use]
    pub fn is_period_expired(&self, now: DateTime<Utc>) -> bool {
        self.period_end.is_some_and(|end| now > end)
    }
}

/// Available subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Entry plan.
    Starter,

    /// Mid-tier plan.
    Pro,

    /// Top plan.
    Studio,
}

impl Plan {
    /// Get the plan name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Studio => "studio",
        }
    }
}

/// Status of a wallet's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Subscription is active; usage is admitted.
    Active,

    /// Payment overdue; usage is blocked until renewal.
    Grace,

    /// Subscription has ended; usage is blocked.
    Expired,
}
