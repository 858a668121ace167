//! Credit transaction types for tollgate.
//!
//! Every balance change appends one transaction record. The record's id is
//! the idempotency key: for usage debits it is the upstream request id, so a
//! retried finalization of the same logical request cannot charge twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{TransactionId, UserId};

/// An append-only ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction id (idempotency key).
    pub tx_id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Credit delta. Negative = usage debit, positive = credit grant.
    pub delta: i64,

    /// The USD amount this transaction represents.
    pub usd_spend: Decimal,

    /// Model or resource name the spend is attributed to; for grants, a
    /// human-readable label.
    pub model_name: String,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create a usage debit keyed by the upstream request id.
    ///
    /// The delta is always negative regardless of the sign of `credits`.
    #[must_use]
    pub fn usage(
        user_id: UserId,
        tx_id: TransactionId,
        credits: i64,
        usd_spend: Decimal,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            tx_id,
            user_id,
            delta: -credits.abs(),
            usd_spend,
            model_name: model_name.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a caller-keyed balance adjustment.
    ///
    /// The caller supplies the transaction id (e.g. a payment-order id),
    /// which is the idempotency key: a retried insert with the same id
    /// must not apply twice. The delta is taken as given.
    #[must_use]
    pub fn adjustment(
        user_id: UserId,
        tx_id: TransactionId,
        delta: i64,
        usd_spend: Decimal,
        label: impl Into<String>,
    ) -> Self {
        Self {
            tx_id,
            user_id,
            delta,
            usd_spend,
            model_name: label.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a credit grant with a generated transaction id.
    ///
    /// Used by the payment/plan-purchase workflow; `label` describes the
    /// grant (e.g. "credit pack", "monthly quota").
    #[must_use]
    pub fn grant(user_id: UserId, credits: i64, label: impl Into<String>) -> Self {
        Self {
            tx_id: TransactionId::generate(),
            user_id,
            delta: credits.abs(),
            usd_spend: Decimal::ZERO,
            model_name: label.into(),
            created_at: Utc::now(),
        }
    }

    /// Check if this transaction is a debit.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        self.delta < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn usage_transaction_is_negative() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::from_request_id("chatcmpl-xyz").unwrap();
        let tx = CreditTransaction::usage(
            user_id,
            tx_id.clone(),
            3,
            Decimal::from_str("0.0041").unwrap(),
            "gpt-4o",
        );

        assert_eq!(tx.tx_id, tx_id);
        assert_eq!(tx.delta, -3);
        assert!(tx.is_debit());
        assert_eq!(tx.model_name, "gpt-4o");
    }

    #[test]
    fn usage_normalizes_sign() {
        let tx = CreditTransaction::usage(
            UserId::generate(),
            TransactionId::generate(),
            -5,
            Decimal::ZERO,
            "gpt-4o",
        );
        assert_eq!(tx.delta, -5);
    }

    #[test]
    fn adjustment_keeps_the_callers_id_and_sign() {
        let tx_id = TransactionId::from_request_id("order-42").unwrap();
        let tx = CreditTransaction::adjustment(
            UserId::generate(),
            tx_id.clone(),
            500,
            Decimal::ZERO,
            "plan purchase",
        );
        assert_eq!(tx.tx_id, tx_id);
        assert_eq!(tx.delta, 500);
        assert_eq!(tx.model_name, "plan purchase");
    }

    #[test]
    fn grant_transaction_is_positive() {
        let tx = CreditTransaction::grant(UserId::generate(), 500, "credit pack");
        assert_eq!(tx.delta, 500);
        assert!(!tx.is_debit());
        assert_eq!(tx.usd_spend, Decimal::ZERO);
    }

    #[test]
    fn serde_roundtrip_preserves_decimal() {
        let tx = CreditTransaction::usage(
            UserId::generate(),
            TransactionId::generate(),
            1,
            Decimal::from_str("0.0001").unwrap(),
            "gpt-4o-mini",
        );
        let json = serde_json::to_string(&tx).unwrap();
        let parsed: CreditTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.usd_spend, Decimal::from_str("0.0001").unwrap());
    }
}
