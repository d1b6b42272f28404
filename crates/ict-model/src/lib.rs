//! # ict-model
//!
//! The transaction codec of ict-rs: a fixed-field binary format in a
//! balanced-ternary alphabet ("trytes"), the Curl sponge that derives the
//! canonical transaction hash, and the builder that brute-forces a nonce
//! until the hash classifies the transaction as the intended bundle
//! head/tail.
//!
//! Two implementations of this format must agree bit-for-bit on field order
//! and widths to interoperate; all offsets live in [`transaction::Field`].
//!
//! The piggybacked request hash is transport metadata, not part of the
//! transaction: it is excluded from the hashed payload and only exists in
//! the datagram codec ([`Transaction::to_datagram`] /
//! [`transaction::decode_datagram`]).

pub mod builder;
pub mod curl;
pub mod transaction;
pub mod trytes;

pub use builder::TransactionBuilder;
pub use transaction::{decode_datagram, Transaction};
pub use trytes::NULL_HASH;

use thiserror::Error;

/// Number of Curl rounds used for the transaction hash.
pub const CURL_ROUNDS_TRANSACTION_HASH: usize = 123;

/// Length of a transaction hash in trytes.
pub const HASH_SIZE_TRYTES: usize = 81;

/// Canonical transaction payload length (request field excluded).
pub const TRANSACTION_SIZE_TRYTES: usize = 2673;

/// One datagram: the canonical payload plus the 81-tryte request header.
pub const PACKET_SIZE_TRYTES: usize = TRANSACTION_SIZE_TRYTES + HASH_SIZE_TRYTES;

/// Datagram length on the wire (3 trytes pack into 2 bytes).
pub const PACKET_SIZE_BYTES: usize = PACKET_SIZE_TRYTES / 3 * 2;

/// Upper bound on nonce attempts before [`CodecError::NonceSearchExhausted`].
///
/// Each attempt succeeds with probability 1/9 (two independent flag trits),
/// so exhausting this many attempts indicates a broken RNG rather than bad
/// luck.
pub const MAX_NONCE_ATTEMPTS: usize = 10_000;

/// Classified codec failures. Malformed inbound packets surface as one of
/// these and are dropped by the receive loop; they never escape as panics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input has the wrong length for the expected structure.
    #[error("expected {expected} {unit}, got {actual}")]
    InvalidLength {
        expected: usize,
        actual: usize,
        unit: &'static str,
    },

    /// A character outside the `9A-Z` alphabet.
    #[error("field '{field}' contains non-tryte characters")]
    NotTrytes { field: &'static str },

    /// A wire byte that does not decode to any tryte triplet.
    #[error("byte {value:#04x} at offset {offset} is not a valid tryte encoding")]
    InvalidByte { value: u8, offset: usize },

    /// A numeric field outside the range representable in its width.
    #[error("numeric field '{field}' outside representable range")]
    NumberOutOfRange { field: &'static str },

    /// A bundle flag trit of the hash is zero, which classifies neither
    /// head nor tail. The nonce search treats this as "try again".
    #[error("flag trit #{trit} of the transaction hash is zero")]
    InvalidFlagTrit { trit: usize },

    /// The decoded payload did not survive re-encoding. Either the input
    /// was corrupted or the field layout disagrees with the sender.
    #[error("decoded payload does not round-trip through the codec")]
    RoundTripMismatch,

    /// The nonce search gave up after [`MAX_NONCE_ATTEMPTS`] samples.
    #[error("no nonce satisfying the bundle flags found in {attempts} attempts")]
    NonceSearchExhausted { attempts: usize },
}
