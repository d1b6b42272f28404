//! # Transaction Builder
//!
//! Assigns a neutral all-blank default to every unset field and searches
//! for a nonce whose resulting hash carries the intended bundle head/tail
//! flags. The search is a bounded brute force: on average 9 samples, capped
//! at [`MAX_NONCE_ATTEMPTS`](crate::MAX_NONCE_ATTEMPTS).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::transaction::{Field, Parts};
use crate::trytes;
use crate::{CodecError, Transaction, MAX_NONCE_ATTEMPTS};

/// Mutable staging area for a new transaction.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    pub signature_fragments: String,
    pub extra_data_digest: String,
    pub address: String,
    pub value: i128,
    pub issuance_timestamp: i64,
    pub timelock_lower_bound: i64,
    pub timelock_upper_bound: i64,
    pub bundle_nonce: String,
    pub trunk_hash: String,
    pub branch_hash: String,
    pub tag: String,
    pub attachment_timestamp: i64,
    pub attachment_timestamp_lower_bound: i64,
    pub attachment_timestamp_upper_bound: i64,
    /// Intended bundle-position classification; the nonce search runs until
    /// the hash-derived flags match these.
    pub is_bundle_head: bool,
    pub is_bundle_tail: bool,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        let now = unix_ms();
        let blank = |field: Field| trytes::pad_right("", field.tryte_length());
        Self {
            signature_fragments: blank(Field::SIGNATURE_FRAGMENTS),
            extra_data_digest: blank(Field::EXTRA_DATA_DIGEST),
            address: blank(Field::ADDRESS),
            value: 0,
            issuance_timestamp: now,
            timelock_lower_bound: 0,
            timelock_upper_bound: 0,
            bundle_nonce: blank(Field::BUNDLE_NONCE),
            trunk_hash: blank(Field::TRUNK_HASH),
            branch_hash: blank(Field::BRANCH_HASH),
            tag: blank(Field::TAG),
            attachment_timestamp: now,
            attachment_timestamp_lower_bound: 0,
            attachment_timestamp_upper_bound: 0,
            is_bundle_head: true,
            is_bundle_tail: true,
        }
    }
}

impl TransactionBuilder {
    /// Store a human-readable message in the signature/message fragment,
    /// right-padded with blanks.
    pub fn ascii_message(&mut self, message: &str) {
        self.signature_fragments = trytes::pad_right(
            &trytes::from_ascii(message),
            Field::SIGNATURE_FRAGMENTS.tryte_length(),
        );
    }

    /// Build the transaction, sampling fresh nonces until the hash-derived
    /// bundle flags match the requested head/tail classification.
    pub fn build(&self) -> Result<Transaction, CodecError> {
        for _ in 0..MAX_NONCE_ATTEMPTS {
            let nonce = trytes::random_trytes(Field::NONCE.tryte_length());
            match Transaction::from_parts(self.parts(nonce)) {
                Ok(tx)
                    if tx.is_bundle_head == self.is_bundle_head
                        && tx.is_bundle_tail == self.is_bundle_tail =>
                {
                    return Ok(tx)
                }
                // Wrong or undefined flags: sample the next nonce.
                Ok(_) | Err(CodecError::InvalidFlagTrit { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(CodecError::NonceSearchExhausted {
            attempts: MAX_NONCE_ATTEMPTS,
        })
    }

    fn parts(&self, nonce: String) -> Parts {
        Parts {
            signature_fragments: self.signature_fragments.clone(),
            extra_data_digest: self.extra_data_digest.clone(),
            address: self.address.clone(),
            value: self.value,
            issuance_timestamp: self.issuance_timestamp,
            timelock_lower_bound: self.timelock_lower_bound,
            timelock_upper_bound: self.timelock_upper_bound,
            bundle_nonce: self.bundle_nonce.clone(),
            trunk_hash: self.trunk_hash.clone(),
            branch_hash: self.branch_hash.clone(),
            tag: self.tag.clone(),
            attachment_timestamp: self.attachment_timestamp,
            attachment_timestamp_lower_bound: self.attachment_timestamp_lower_bound,
            attachment_timestamp_upper_bound: self.attachment_timestamp_upper_bound,
            nonce,
        }
    }
}

fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
