//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store`
//! trait.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tollgate_core::{CreditTransaction, TransactionId, UserId, Wallet};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{RecordOutcome, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,

    // Serializes the compound read-modify-write operations. RocksDB batches
    // are atomic but the idempotency check and the balance read happen
    // before the batch commits; without this lock two finalizations racing
    // on one tx_id could both pass the check.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Wallet Operations
    // =========================================================================

    fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf(cf::WALLETS)?;
        let key = keys::wallet_key(&wallet.user_id);
        let value = Self::serialize(wallet)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let cf = self.cf(cf::WALLETS)?;
        let key = keys::wallet_key(user_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn update_balance(&self, user_id: &UserId, delta: i64) -> Result<i64> {
        let _guard = self.lock_writes();

        let cf = self.cf(cf::WALLETS)?;
        let key = keys::wallet_key(user_id);

        let mut wallet = self.get_wallet(user_id)?.ok_or(StoreError::NotFound)?;

        wallet.balance += delta;
        wallet.updated_at = chrono::Utc::now();

        let value = Self::serialize(&wallet)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(wallet.balance)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, tx_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;
        let key = keys::transaction_key(tx_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn has_transaction(&self, tx_id: &TransactionId) -> Result<bool> {
        let cf = self.cf(cf::TRANSACTIONS)?;
        let key = keys::transaction_key(tx_id);

        let exists = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();

        Ok(exists)
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);

        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // Index keys embed created_at, so forward order is oldest first.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            all_keys.push(key.to_vec());
        }

        // Reverse to get newest first.
        all_keys.reverse();

        let mut transactions = Vec::new();
        let mut skipped = 0;

        for key in all_keys {
            if skipped < offset {
                skipped += 1;
                continue;
            }

            if transactions.len() >= limit {
                break;
            }

            let Some(tx_id) = keys::extract_transaction_id_from_user_key(&key) else {
                tracing::warn!("skipping malformed index key");
                continue;
            };
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn record_usage(&self, tx: &CreditTransaction) -> Result<RecordOutcome> {
        let _guard = self.lock_writes();

        // Duplicate finalization of the same logical request is a no-op.
        if self.has_transaction(&tx.tx_id)? {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let mut wallet = self.get_wallet(&tx.user_id)?.ok_or(StoreError::NotFound)?;

        // The admission gate ran before the upstream call; by the time a
        // streamed response finishes the balance may no longer cover the
        // debit. The debit still lands, possibly below zero.
        wallet.balance += tx.delta;
        wallet.updated_at = chrono::Utc::now();

        let cf_wallets = self.cf(cf::WALLETS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        let wallet_key = keys::wallet_key(&tx.user_id);
        let tx_key = keys::transaction_key(&tx.tx_id);
        let user_tx_key = keys::user_transaction_key(&tx.user_id, tx.created_at, &tx.tx_id);

        let wallet_value = Self::serialize(&wallet)?;
        let tx_value = Self::serialize(tx)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, &wallet_key, &wallet_value);
        batch.put_cf(&cf_tx, &tx_key, &tx_value);
        batch.put_cf(&cf_tx_by_user, &user_tx_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(RecordOutcome::Applied {
            new_balance: wallet.balance,
        })
    }

    fn add_credits(&self, user_id: &UserId, tx: &CreditTransaction) -> Result<RecordOutcome> {
        let _guard = self.lock_writes();

        // A replayed payment-order id must not credit twice.
        if self.has_transaction(&tx.tx_id)? {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let mut wallet = self.get_wallet(user_id)?.ok_or(StoreError::NotFound)?;

        wallet.balance += tx.delta;
        wallet.updated_at = chrono::Utc::now();

        let cf_wallets = self.cf(cf::WALLETS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        let wallet_key = keys::wallet_key(user_id);
        let tx_key = keys::transaction_key(&tx.tx_id);
        let user_tx_key = keys::user_transaction_key(user_id, tx.created_at, &tx.tx_id);

        let wallet_value = Self::serialize(&wallet)?;
        let tx_value = Self::serialize(tx)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, &wallet_key, &wallet_value);
        batch.put_cf(&cf_tx, &tx_key, &tx_value);
        batch.put_cf(&cf_tx_by_user, &user_tx_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(RecordOutcome::Applied {
            new_balance: wallet.balance,
        })
    }
}
