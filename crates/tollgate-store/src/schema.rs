//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary wallet records, keyed by `user_id`.
    pub const WALLETS: &str = "wallets";

    /// Credit transactions, keyed by `tx_id` (the idempotency key).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, keyed by
    /// `user_id || created_at || tx_id`. Value is empty (index only).
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::WALLETS, cf::TRANSACTIONS, cf::TRANSACTIONS_BY_USER]
}
