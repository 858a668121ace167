//! The credit ledger: admission checks and balance mutation.
//!
//! All balance changes flow through this type. Usage debits are idempotent
//! on the transaction id and are never refused for insufficient balance:
//! admission was already decided before the upstream call, and a debit that
//! arrives late must still land even if it takes the balance negative.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use tollgate_core::{
    credits_for_usd, BillingError, CreditTransaction, Result, TransactionId, UserId, Wallet,
    WalletStatus,
};
use tollgate_store::{RecordOutcome, Store, StoreError};

/// Outcome of recording a usage debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit was applied.
    Applied {
        /// Credits charged.
        credits: i64,
        /// Balance after the debit.
        new_balance: i64,
    },

    /// This transaction id was already billed; nothing changed.
    AlreadyRecorded,
}

/// Per-user credit accounting over a [`Store`].
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
    credit_rate: Decimal,
}

impl CreditLedger {
    /// Create a ledger charging `credit_rate` USD per credit.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, credit_rate: Decimal) -> Self {
        Self { store, credit_rate }
    }

    /// The USD value of one credit.
    #[must_use]
    pub const fn credit_rate(&self) -> Decimal {
        self.credit_rate
    }

    /// Convert a USD amount to whole credits at this ledger's rate.
    #[must_use]
    pub fn credits_for_usd(&self, usd: Decimal) -> i64 {
        credits_for_usd(usd, self.credit_rate)
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Check whether a user may start a billable operation.
    ///
    /// Checks run in a fixed order: subscription status, period expiry,
    /// then balance. Returns the current balance on success.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users and one
    /// of the admission-denied variants when a check fails.
    pub fn check_eligibility(&self, user_id: &UserId, min_credits: i64) -> Result<i64> {
        let wallet = self.wallet(user_id)?;

        if wallet.status != WalletStatus::Active {
            return Err(BillingError::SubscriptionInactive {
                user_id: user_id.to_string(),
            });
        }
        if wallet.is_period_expired(Utc::now()) {
            let period_end = wallet
                .period_end
                .map(|end| end.to_rfc3339())
                .unwrap_or_default();
            return Err(BillingError::SubscriptionExpired { period_end });
        }
        if !wallet.has_sufficient_credits(min_credits) {
            return Err(BillingError::InsufficientCredits {
                balance: wallet.balance,
                required: min_credits,
            });
        }
        Ok(wallet.balance)
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Get a user's wallet.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users.
    pub fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.store
            .get_wallet(user_id)
            .map_err(|e| storage_error(user_id, &e))?
            .ok_or_else(|| BillingError::AccountNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Get a user's current balance.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users.
    pub fn balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.wallet(user_id)?.balance)
    }

    /// Grant credits to a user, appending a grant transaction.
    ///
    /// The transaction id is generated; use [`CreditLedger::insert_transaction`]
    /// when the caller holds its own idempotency key. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users.
    pub fn credit(&self, user_id: &UserId, credits: i64, label: &str) -> Result<i64> {
        let tx = CreditTransaction::grant(*user_id, credits, label);
        self.apply_grant(user_id, &tx)
    }

    /// Apply a caller-keyed balance adjustment.
    ///
    /// `tx_id` is the idempotency key (the payment workflow passes its order
    /// id): a replay of an already-recorded id changes nothing and returns
    /// the current balance. `delta` is applied as given.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users.
    pub fn insert_transaction(
        &self,
        user_id: UserId,
        tx_id: TransactionId,
        delta: i64,
        usd_spend: Decimal,
        label: &str,
    ) -> Result<i64> {
        let tx = CreditTransaction::adjustment(user_id, tx_id, delta, usd_spend, label);
        self.apply_grant(&user_id, &tx)
    }

    fn apply_grant(&self, user_id: &UserId, tx: &CreditTransaction) -> Result<i64> {
        match self
            .store
            .add_credits(user_id, tx)
            .map_err(|e| storage_error(user_id, &e))?
        {
            RecordOutcome::Applied { new_balance } => {
                tracing::info!(
                    user_id = %user_id,
                    tx_id = %tx.tx_id,
                    delta = tx.delta,
                    label = %tx.model_name,
                    new_balance,
                    "credits granted"
                );
                Ok(new_balance)
            }
            RecordOutcome::AlreadyRecorded => {
                tracing::debug!(
                    user_id = %user_id,
                    tx_id = %tx.tx_id,
                    "duplicate grant ignored"
                );
                self.balance(user_id)
            }
        }
    }

    /// List a user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Storage`] if the read fails.
    pub fn transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.store
            .list_transactions_by_user(user_id, limit, offset)
            .map_err(|e| storage_error(user_id, &e))
    }

    // =========================================================================
    // Usage Debits
    // =========================================================================

    /// Record a finalized usage spend as a credit debit.
    ///
    /// The USD amount is converted to whole credits (rounded up) and
    /// debited together with the transaction append in one atomic write.
    /// Replays of the same transaction id are no-ops. The balance may go
    /// negative.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::AccountNotFound`] for unknown users and
    /// [`BillingError::Storage`] if the write fails.
    pub fn record_and_debit(
        &self,
        user_id: UserId,
        tx_id: TransactionId,
        usd_spend: Decimal,
        model_name: &str,
    ) -> Result<DebitOutcome> {
        let credits = self.credits_for_usd(usd_spend);
        let tx = CreditTransaction::usage(user_id, tx_id, credits, usd_spend, model_name);

        match self
            .store
            .record_usage(&tx)
            .map_err(|e| storage_error(&user_id, &e))?
        {
            RecordOutcome::Applied { new_balance } => {
                tracing::info!(
                    user_id = %user_id,
                    tx_id = %tx.tx_id,
                    credits,
                    usd = %usd_spend,
                    model = model_name,
                    new_balance,
                    "usage debited"
                );
                Ok(DebitOutcome::Applied {
                    credits,
                    new_balance,
                })
            }
            RecordOutcome::AlreadyRecorded => {
                tracing::debug!(
                    user_id = %user_id,
                    tx_id = %tx.tx_id,
                    "duplicate usage finalization ignored"
                );
                Ok(DebitOutcome::AlreadyRecorded)
            }
        }
    }
}

fn storage_error(user_id: &UserId, err: &StoreError) -> BillingError {
    match err {
        StoreError::NotFound => BillingError::AccountNotFound {
            user_id: user_id.to_string(),
        },
        other => BillingError::Storage(other.to_string()),
    }
}
