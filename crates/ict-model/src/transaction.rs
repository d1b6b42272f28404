//! # Transaction
//!
//! The immutable value object at the heart of the protocol. Fields occupy
//! fixed, contiguous, non-overlapping tryte offsets; the canonical hash is
//! computed once, at construction, over the full encoded payload (with the
//! transport-only request header blanked).

use std::sync::{Arc, OnceLock};

use crate::trytes::{self, NULL_HASH};
use crate::{
    curl, CodecError, CURL_ROUNDS_TRANSACTION_HASH, HASH_SIZE_TRYTES, PACKET_SIZE_BYTES,
    PACKET_SIZE_TRYTES, TRANSACTION_SIZE_TRYTES,
};

/// A fixed slice of the transaction payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub trit_offset: usize,
    pub trit_length: usize,
}

impl Field {
    const fn first(trit_length: usize) -> Self {
        Self {
            trit_offset: 0,
            trit_length,
        }
    }

    /// The field directly following `self`.
    const fn then(self, trit_length: usize) -> Self {
        Self {
            trit_offset: self.trit_offset + self.trit_length,
            trit_length,
        }
    }

    pub const fn tryte_offset(&self) -> usize {
        self.trit_offset / 3
    }

    pub const fn tryte_length(&self) -> usize {
        self.trit_length / 3
    }
}

impl Field {
    pub const SIGNATURE_FRAGMENTS: Field = Field::first(6561);
    pub const EXTRA_DATA_DIGEST: Field = Field::SIGNATURE_FRAGMENTS.then(243);
    pub const ADDRESS: Field = Field::EXTRA_DATA_DIGEST.then(243);
    pub const VALUE: Field = Field::ADDRESS.then(81);
    pub const ISSUANCE_TIMESTAMP: Field = Field::VALUE.then(27);
    pub const TIMELOCK_LOWER_BOUND: Field = Field::ISSUANCE_TIMESTAMP.then(27);
    pub const TIMELOCK_UPPER_BOUND: Field = Field::TIMELOCK_LOWER_BOUND.then(27);
    pub const BUNDLE_NONCE: Field = Field::TIMELOCK_UPPER_BOUND.then(81);
    pub const TRUNK_HASH: Field = Field::BUNDLE_NONCE.then(243);
    pub const BRANCH_HASH: Field = Field::TRUNK_HASH.then(243);
    pub const TAG: Field = Field::BRANCH_HASH.then(81);
    pub const ATTACHMENT_TIMESTAMP: Field = Field::TAG.then(27);
    pub const ATTACHMENT_TIMESTAMP_LOWER_BOUND: Field = Field::ATTACHMENT_TIMESTAMP.then(27);
    pub const ATTACHMENT_TIMESTAMP_UPPER_BOUND: Field =
        Field::ATTACHMENT_TIMESTAMP_LOWER_BOUND.then(27);
    pub const NONCE: Field = Field::ATTACHMENT_TIMESTAMP_UPPER_BOUND.then(81);
    /// Transport-only request header, appended after the canonical payload.
    pub const REQUEST_HASH: Field = Field::NONCE.then(243);
}

/// Trits of the transaction hash that classify bundle position.
/// `1` sets the flag, `-1` clears it, `0` makes the hash invalid.
pub mod hash_flags {
    pub const BUNDLE_HEAD: usize = 1;
    pub const BUNDLE_TAIL: usize = 2;
}

/// An immutable, canonically hashed transaction.
///
/// Equality of encoded payloads implies equality of hashes; construction
/// fails with a [`CodecError`] if the payload does not round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
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
    pub nonce: String,

    /// [`signature_fragments`](Self::signature_fragments) decoded as ASCII.
    pub decoded_message: String,
    /// Canonical identity: Curl digest over the encoded payload.
    pub hash: String,
    pub is_bundle_head: bool,
    pub is_bundle_tail: bool,

    trytes: String,
}

impl Transaction {
    /// The canonical encoded payload ([`TRANSACTION_SIZE_TRYTES`] trytes,
    /// request header excluded).
    pub fn trytes(&self) -> &str {
        &self.trytes
    }

    /// Decode a transaction from its canonical trytes.
    pub fn from_trytes(payload: &str) -> Result<Self, CodecError> {
        if payload.len() != TRANSACTION_SIZE_TRYTES {
            return Err(CodecError::InvalidLength {
                expected: TRANSACTION_SIZE_TRYTES,
                actual: payload.len(),
                unit: "trytes",
            });
        }
        if !trytes::is_trytes(payload) {
            return Err(CodecError::NotTrytes {
                field: "transaction",
            });
        }

        let tx = Self::from_parts(Parts {
            signature_fragments: extract(payload, Field::SIGNATURE_FRAGMENTS).to_string(),
            extra_data_digest: extract(payload, Field::EXTRA_DATA_DIGEST).to_string(),
            address: extract(payload, Field::ADDRESS).to_string(),
            value: extract_number(payload, Field::VALUE, "value")?,
            issuance_timestamp: extract_i64(payload, Field::ISSUANCE_TIMESTAMP, "issuance")?,
            timelock_lower_bound: extract_i64(
                payload,
                Field::TIMELOCK_LOWER_BOUND,
                "timelock_lower",
            )?,
            timelock_upper_bound: extract_i64(
                payload,
                Field::TIMELOCK_UPPER_BOUND,
                "timelock_upper",
            )?,
            bundle_nonce: extract(payload, Field::BUNDLE_NONCE).to_string(),
            trunk_hash: extract(payload, Field::TRUNK_HASH).to_string(),
            branch_hash: extract(payload, Field::BRANCH_HASH).to_string(),
            tag: extract(payload, Field::TAG).to_string(),
            attachment_timestamp: extract_i64(
                payload,
                Field::ATTACHMENT_TIMESTAMP,
                "attachment",
            )?,
            attachment_timestamp_lower_bound: extract_i64(
                payload,
                Field::ATTACHMENT_TIMESTAMP_LOWER_BOUND,
                "attachment_lower",
            )?,
            attachment_timestamp_upper_bound: extract_i64(
                payload,
                Field::ATTACHMENT_TIMESTAMP_UPPER_BOUND,
                "attachment_upper",
            )?,
            nonce: extract(payload, Field::NONCE).to_string(),
        })?;

        // The reconstructed payload must match the input bit for bit.
        if tx.trytes != payload {
            return Err(CodecError::RoundTripMismatch);
        }
        Ok(tx)
    }

    /// Construct from individual fields, computing the canonical payload,
    /// the hash and the bundle flags.
    pub(crate) fn from_parts(parts: Parts) -> Result<Self, CodecError> {
        let payload = parts.encode()?;
        let hash = curl::hash_trytes(
            &format!("{payload}{NULL_HASH}"),
            CURL_ROUNDS_TRANSACTION_HASH,
        );

        let hash_trits = trytes::to_trits(&hash);
        let is_bundle_head = flag(&hash_trits, hash_flags::BUNDLE_HEAD)?;
        let is_bundle_tail = flag(&hash_trits, hash_flags::BUNDLE_TAIL)?;
        let decoded_message = trytes::to_ascii(&parts.signature_fragments);

        Ok(Self {
            signature_fragments: parts.signature_fragments,
            extra_data_digest: parts.extra_data_digest,
            address: parts.address,
            value: parts.value,
            issuance_timestamp: parts.issuance_timestamp,
            timelock_lower_bound: parts.timelock_lower_bound,
            timelock_upper_bound: parts.timelock_upper_bound,
            bundle_nonce: parts.bundle_nonce,
            trunk_hash: parts.trunk_hash,
            branch_hash: parts.branch_hash,
            tag: parts.tag,
            attachment_timestamp: parts.attachment_timestamp,
            attachment_timestamp_lower_bound: parts.attachment_timestamp_lower_bound,
            attachment_timestamp_upper_bound: parts.attachment_timestamp_upper_bound,
            nonce: parts.nonce,
            decoded_message,
            hash,
            is_bundle_head,
            is_bundle_tail,
            trytes: payload,
        })
    }

    /// Encode this transaction plus a piggybacked request hash into one
    /// datagram. `request_hash` must be [`HASH_SIZE_TRYTES`] trytes; use
    /// [`NULL_HASH`] when nothing is requested.
    pub fn to_datagram(&self, request_hash: &str) -> Result<Vec<u8>, CodecError> {
        if request_hash.len() != HASH_SIZE_TRYTES || !trytes::is_trytes(request_hash) {
            return Err(CodecError::NotTrytes {
                field: "request_hash",
            });
        }
        Ok(trytes::to_bytes(&format!("{}{request_hash}", self.trytes)))
    }

    /// The sentinel: an all-blank payload whose identity is, by definition,
    /// the [`NULL_HASH`]. Always present in the store, never evicted, and
    /// the resolution target of all-blank trunk/branch references.
    pub fn null_transaction() -> Arc<Transaction> {
        static NULL_TRANSACTION: OnceLock<Arc<Transaction>> = OnceLock::new();
        NULL_TRANSACTION
            .get_or_init(|| {
                let parts = Parts::all_blank();
                let payload = trytes::pad_right("", TRANSACTION_SIZE_TRYTES);
                Arc::new(Transaction {
                    signature_fragments: parts.signature_fragments,
                    extra_data_digest: parts.extra_data_digest,
                    address: parts.address,
                    value: 0,
                    issuance_timestamp: 0,
                    timelock_lower_bound: 0,
                    timelock_upper_bound: 0,
                    bundle_nonce: parts.bundle_nonce,
                    trunk_hash: parts.trunk_hash,
                    branch_hash: parts.branch_hash,
                    tag: parts.tag,
                    attachment_timestamp: 0,
                    attachment_timestamp_lower_bound: 0,
                    attachment_timestamp_upper_bound: 0,
                    nonce: parts.nonce,
                    decoded_message: String::new(),
                    hash: NULL_HASH.to_string(),
                    is_bundle_head: true,
                    is_bundle_tail: true,
                    trytes: payload,
                })
            })
            .clone()
    }
}

/// Decode one inbound datagram into a transaction and the piggybacked
/// request hash ([`NULL_HASH`] when the sender requested nothing).
pub fn decode_datagram(bytes: &[u8]) -> Result<(Transaction, String), CodecError> {
    if bytes.len() != PACKET_SIZE_BYTES {
        return Err(CodecError::InvalidLength {
            expected: PACKET_SIZE_BYTES,
            actual: bytes.len(),
            unit: "bytes",
        });
    }
    let packet_trytes = trytes::from_bytes(bytes)?;
    debug_assert_eq!(packet_trytes.len(), PACKET_SIZE_TRYTES);
    let transaction = Transaction::from_trytes(&packet_trytes[..TRANSACTION_SIZE_TRYTES])?;
    let request_hash = packet_trytes[TRANSACTION_SIZE_TRYTES..].to_string();
    Ok((transaction, request_hash))
}

/// Raw field values before encoding; the builder and the decoder both feed
/// [`Transaction::from_parts`] through this.
pub(crate) struct Parts {
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
    pub nonce: String,
}

impl Parts {
    pub(crate) fn all_blank() -> Self {
        Self {
            signature_fragments: blank(Field::SIGNATURE_FRAGMENTS),
            extra_data_digest: blank(Field::EXTRA_DATA_DIGEST),
            address: blank(Field::ADDRESS),
            value: 0,
            issuance_timestamp: 0,
            timelock_lower_bound: 0,
            timelock_upper_bound: 0,
            bundle_nonce: blank(Field::BUNDLE_NONCE),
            trunk_hash: blank(Field::TRUNK_HASH),
            branch_hash: blank(Field::BRANCH_HASH),
            tag: blank(Field::TAG),
            attachment_timestamp: 0,
            attachment_timestamp_lower_bound: 0,
            attachment_timestamp_upper_bound: 0,
            nonce: blank(Field::NONCE),
        }
    }

    fn encode(&self) -> Result<String, CodecError> {
        let mut payload = String::with_capacity(TRANSACTION_SIZE_TRYTES);
        put(&mut payload, Field::SIGNATURE_FRAGMENTS, &self.signature_fragments, "signature_fragments")?;
        put(&mut payload, Field::EXTRA_DATA_DIGEST, &self.extra_data_digest, "extra_data_digest")?;
        put(&mut payload, Field::ADDRESS, &self.address, "address")?;
        put_number(&mut payload, Field::VALUE, self.value, "value")?;
        put_number(&mut payload, Field::ISSUANCE_TIMESTAMP, self.issuance_timestamp as i128, "issuance")?;
        put_number(&mut payload, Field::TIMELOCK_LOWER_BOUND, self.timelock_lower_bound as i128, "timelock_lower")?;
        put_number(&mut payload, Field::TIMELOCK_UPPER_BOUND, self.timelock_upper_bound as i128, "timelock_upper")?;
        put(&mut payload, Field::BUNDLE_NONCE, &self.bundle_nonce, "bundle_nonce")?;
        put(&mut payload, Field::TRUNK_HASH, &self.trunk_hash, "trunk_hash")?;
        put(&mut payload, Field::BRANCH_HASH, &self.branch_hash, "branch_hash")?;
        put(&mut payload, Field::TAG, &self.tag, "tag")?;
        put_number(&mut payload, Field::ATTACHMENT_TIMESTAMP, self.attachment_timestamp as i128, "attachment")?;
        put_number(&mut payload, Field::ATTACHMENT_TIMESTAMP_LOWER_BOUND, self.attachment_timestamp_lower_bound as i128, "attachment_lower")?;
        put_number(&mut payload, Field::ATTACHMENT_TIMESTAMP_UPPER_BOUND, self.attachment_timestamp_upper_bound as i128, "attachment_upper")?;
        put(&mut payload, Field::NONCE, &self.nonce, "nonce")?;
        debug_assert_eq!(payload.len(), TRANSACTION_SIZE_TRYTES);
        Ok(payload)
    }
}

fn blank(field: Field) -> String {
    trytes::pad_right("", field.tryte_length())
}

fn put(
    payload: &mut String,
    field: Field,
    value: &str,
    name: &'static str,
) -> Result<(), CodecError> {
    debug_assert_eq!(payload.len(), field.tryte_offset());
    if value.len() != field.tryte_length() || !trytes::is_trytes(value) {
        return Err(CodecError::NotTrytes { field: name });
    }
    payload.push_str(value);
    Ok(())
}

fn put_number(
    payload: &mut String,
    field: Field,
    value: i128,
    name: &'static str,
) -> Result<(), CodecError> {
    let encoded = trytes::from_number(value, field.tryte_length())
        .ok_or(CodecError::NumberOutOfRange { field: name })?;
    payload.push_str(&encoded);
    Ok(())
}

fn extract(payload: &str, field: Field) -> &str {
    &payload[field.tryte_offset()..field.tryte_offset() + field.tryte_length()]
}

fn extract_number(
    payload: &str,
    field: Field,
    name: &'static str,
) -> Result<i128, CodecError> {
    trytes::to_number(extract(payload, field)).ok_or(CodecError::NumberOutOfRange { field: name })
}

fn extract_i64(payload: &str, field: Field, name: &'static str) -> Result<i64, CodecError> {
    let number = extract_number(payload, field, name)?;
    i64::try_from(number).map_err(|_| CodecError::NumberOutOfRange { field: name })
}

fn flag(hash_trits: &[i8], trit: usize) -> Result<bool, CodecError> {
    match hash_trits[trit] {
        1 => Ok(true),
        -1 => Ok(false),
        _ => Err(CodecError::InvalidFlagTrit { trit }),
    }
}
