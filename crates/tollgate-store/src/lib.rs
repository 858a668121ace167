//! `RocksDB` storage layer for tollgate.
//!
//! This crate provides persistent storage for wallets and the append-only
//! credit transaction log using `RocksDB` with column families.
//!
//! # Architecture
//!
//! - `wallets`: Primary wallet records, keyed by `user_id`
//! - `transactions`: Credit transactions, keyed by `tx_id` — the existence
//!   of a row under a given `tx_id` is the idempotency check for usage
//!   billing
//! - `transactions_by_user`: Index for listing transactions by user,
//!   time-ordered
//!
//! # Example
//!
//! ```no_run
//! use tollgate_store::{RocksStore, Store};
//! use tollgate_core::{Plan, UserId, Wallet};
//!
//! let store = RocksStore::open("/tmp/tollgate-db").unwrap();
//!
//! let user_id = UserId::generate();
//! let wallet = Wallet::new(user_id, Plan::Starter, 500, None);
//! store.put_wallet(&wallet).unwrap();
//!
//! let retrieved = store.get_wallet(&user_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use tollgate_core::{CreditTransaction, TransactionId, UserId, Wallet};

/// Outcome of an idempotent usage recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The debit was applied and the transaction appended.
    Applied {
        /// Balance after the debit.
        new_balance: i64,
    },

    /// A transaction with this id already exists; nothing was changed.
    AlreadyRecorded,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g. `RocksDB`, in-memory for testing). The ledger is
/// the only component that mutates balances or appends transactions.
pub trait Store: Send + Sync {
    // =========================================================================
    // Wallet Operations
    // =========================================================================

    /// Insert or update a wallet record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_wallet(&self, wallet: &Wallet) -> Result<()>;

    /// Get a wallet by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>>;

    /// Apply a signed delta to a wallet balance.
    ///
    /// Returns the new balance. The balance is allowed to go negative: the
    /// admission gate and the eventual debit are temporally separated by
    /// design, so a late debit must always land.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    fn update_balance(&self, user_id: &UserId, delta: i64) -> Result<i64>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, tx_id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// Check whether a transaction id has already been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_transaction(&self, tx_id: &TransactionId) -> Result<bool>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Record a usage debit idempotently.
    ///
    /// If a transaction with `tx.tx_id` already exists this is a no-op
    /// returning [`RecordOutcome::AlreadyRecorded`]. Otherwise the balance
    /// update and the transaction append commit in a single write batch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    fn record_usage(&self, tx: &CreditTransaction) -> Result<RecordOutcome>;

    /// Add credits to a wallet and append the grant transaction atomically.
    ///
    /// Idempotent on `tx.tx_id`, same as [`Store::record_usage`]: the
    /// payment workflow keys grants by its order id, and a retried order
    /// must not credit twice.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    fn add_credits(&self, user_id: &UserId, tx: &CreditTransaction) -> Result<RecordOutcome>;
}
