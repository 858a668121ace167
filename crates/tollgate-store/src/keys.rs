//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families.

use chrono::{DateTime, Utc};

use tollgate_core::{TransactionId, UserId};

/// Create a wallet key from a user id.
#[must_use]
pub fn wallet_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction id.
#[must_use]
pub fn transaction_key(tx_id: &TransactionId) -> Vec<u8> {
    tx_id.as_bytes().to_vec()
}

/// Create a user-transaction index key.
///
/// Format: `user_id (16 bytes) || created_at millis (8 bytes, big-endian)
/// || tx_id (variable)`.
///
/// Transaction ids are arbitrary upstream request ids, so time ordering
/// comes from the embedded timestamp rather than the id itself.
#[must_use]
pub fn user_transaction_key(
    user_id: &UserId,
    created_at: DateTime<Utc>,
    tx_id: &TransactionId,
) -> Vec<u8> {
    let ts = created_at.timestamp_millis().max(0);
    #[allow(clippy::cast_sign_loss)]
    let ts_bytes = (ts as u64).to_be_bytes();

    let mut key = Vec::with_capacity(24 + tx_id.as_bytes().len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&ts_bytes);
    key.extend_from_slice(tx_id.as_bytes());
    key
}

/// Create a prefix for iterating all transactions for a user.
#[must_use]
pub fn user_transactions_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the transaction id from a user-transaction index key.
///
/// Returns `None` if the key is too short or the id bytes are not valid
/// UTF-8.
#[must_use]
pub fn extract_transaction_id_from_user_key(key: &[u8]) -> Option<TransactionId> {
    let raw = key.get(24..)?;
    let id = std::str::from_utf8(raw).ok()?;
    TransactionId::from_request_id(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_key_length() {
        let user_id = UserId::generate();
        let key = wallet_key(&user_id);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn user_transaction_key_format() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::from_request_id("chatcmpl-123").unwrap();
        let now = Utc::now();
        let key = user_transaction_key(&user_id, now, &tx_id);

        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[24..], tx_id.as_bytes());
    }

    #[test]
    fn index_keys_sort_by_time() {
        let user_id = UserId::generate();
        let tx = TransactionId::from_request_id("same-id").unwrap();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(5);

        let k0 = user_transaction_key(&user_id, t0, &tx);
        let k1 = user_transaction_key(&user_id, t1, &tx);
        assert!(k0 < k1);
    }

    #[test]
    fn extract_transaction_id_roundtrip() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::from_request_id("chatcmpl-abc").unwrap();
        let key = user_transaction_key(&user_id, Utc::now(), &tx_id);

        let extracted = extract_transaction_id_from_user_key(&key).unwrap();
        assert_eq!(extracted, tx_id);
    }

    #[test]
    fn extract_rejects_short_keys() {
        assert!(extract_transaction_id_from_user_key(&[0u8; 10]).is_none());
    }
}
