//! # Tryte Alphabet
//!
//! Conversions between the balanced-ternary wire alphabet and trits, bytes,
//! signed numbers and ASCII text.
//!
//! A tryte is one of the 27 characters `9A-Z` and stands for three trits
//! (each −1, 0 or 1). On the wire, 3 trytes (9 trits) pack into 2 bytes:
//! the first byte carries the first two tryte indices' low parts, the
//! second the rest — see [`to_bytes`] / [`from_bytes`].

use rand::Rng;

use crate::CodecError;

/// The 27-character alphabet. `9` is the neutral "blank" symbol.
pub const TRYTE_ALPHABET: &str = "9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// An 81-tryte hash of all blanks: the sentinel transaction's identity and
/// the "no request" marker in the packet header.
pub const NULL_HASH: &str =
    "999999999999999999999999999999999999999999999999999999999999999999999999999999999";

/// Trit triplets indexed by tryte, least significant trit first.
#[rustfmt::skip]
const TRITS_BY_TRYTE: [[i8; 3]; 27] = [
    [0, 0, 0], [1, 0, 0], [-1, 1, 0],    // 9AB
    [0, 1, 0], [1, 1, 0], [-1, -1, 1],   // CDE
    [0, -1, 1], [1, -1, 1], [-1, 0, 1],  // FGH
    [0, 0, 1], [1, 0, 1], [-1, 1, 1],    // IJK
    [0, 1, 1], [1, 1, 1], [-1, -1, -1],  // LMN
    [0, -1, -1], [1, -1, -1], [-1, 0, -1], // OPQ
    [0, 0, -1], [1, 0, -1], [-1, 1, -1], // RST
    [0, 1, -1], [1, 1, -1], [-1, -1, 0], // UVW
    [0, -1, 0], [1, -1, 0], [-1, 0, 0],  // XYZ
];

/// Index of a tryte character in the alphabet, or `None` for foreign chars.
fn tryte_index(c: u8) -> Option<usize> {
    match c {
        b'9' => Some(0),
        b'A'..=b'Z' => Some((c - b'A' + 1) as usize),
        _ => None,
    }
}

fn tryte_char(index: usize) -> char {
    debug_assert!(index < 27);
    TRYTE_ALPHABET.as_bytes()[index] as char
}

/// `true` iff every character is in the alphabet.
pub fn is_trytes(s: &str) -> bool {
    s.bytes().all(|c| tryte_index(c).is_some())
}

/// Expand trytes to trits, 3 per tryte. Caller guarantees valid trytes.
pub fn to_trits(trytes: &str) -> Vec<i8> {
    let mut trits = Vec::with_capacity(trytes.len() * 3);
    for c in trytes.bytes() {
        let index = tryte_index(c).expect("caller passed validated trytes");
        trits.extend_from_slice(&TRITS_BY_TRYTE[index]);
    }
    trits
}

/// Collapse trits back into trytes. `trits.len()` must be a multiple of 3.
pub fn from_trits(trits: &[i8]) -> String {
    debug_assert!(trits.len() % 3 == 0);
    trits
        .chunks_exact(3)
        .map(|t| {
            let index = t[0] as i32 + 3 * t[1] as i32 + 9 * t[2] as i32;
            tryte_char(((index + 27) % 27) as usize)
        })
        .collect()
}

/// Pack trytes into wire bytes (3 trytes per 2 bytes).
///
/// `trytes.len()` must be a multiple of 3.
pub fn to_bytes(trytes: &str) -> Vec<u8> {
    debug_assert!(trytes.len() % 3 == 0);
    let raw = trytes.as_bytes();
    let mut bytes = Vec::with_capacity(trytes.len() / 3 * 2);
    for triplet in raw.chunks_exact(3) {
        let i0 = tryte_index(triplet[0]).expect("caller passed validated trytes") as u8;
        let i1 = tryte_index(triplet[1]).expect("caller passed validated trytes") as u8;
        let i2 = tryte_index(triplet[2]).expect("caller passed validated trytes") as u8;
        bytes.push(i0 * 8 + i2 % 8);
        bytes.push(i1 * 8 + i2 / 8);
    }
    bytes
}

/// Unpack wire bytes into trytes.
///
/// Fails with [`CodecError::InvalidByte`] on byte pairs that do not encode
/// a tryte triplet, and [`CodecError::InvalidLength`] on odd input.
pub fn from_bytes(bytes: &[u8]) -> Result<String, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::InvalidLength {
            expected: bytes.len() + 1,
            actual: bytes.len(),
            unit: "bytes",
        });
    }
    let mut trytes = String::with_capacity(bytes.len() / 2 * 3);
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let (b0, b1) = (pair[0], pair[1]);
        let i0 = b0 / 8;
        let i1 = b1 / 8;
        let i2 = b0 % 8 + 8 * (b1 % 8);
        if i0 > 26 {
            return Err(CodecError::InvalidByte {
                value: b0,
                offset: 2 * i,
            });
        }
        if i1 > 26 || i2 > 26 {
            return Err(CodecError::InvalidByte {
                value: b1,
                offset: 2 * i + 1,
            });
        }
        trytes.push(tryte_char(i0 as usize));
        trytes.push(tryte_char(i1 as usize));
        trytes.push(tryte_char(i2 as usize));
    }
    Ok(trytes)
}

/// Decode a balanced-ternary number, first tryte least significant.
///
/// Returns `None` if the value does not fit in an `i128`.
pub fn to_number(trytes: &str) -> Option<i128> {
    let mut number: i128 = 0;
    for c in trytes.bytes().rev() {
        let trits = TRITS_BY_TRYTE[tryte_index(c)?];
        let digit = trits[2] as i128 * 9 + trits[1] as i128 * 3 + trits[0] as i128;
        number = number.checked_mul(27)?.checked_add(digit)?;
    }
    Some(number)
}

/// Encode a signed number in balanced ternary across `tryte_length` trytes.
///
/// Returns `None` if the value is outside the representable range
/// `±(3^(3·tryte_length) − 1)/2`.
pub fn from_number(value: i128, tryte_length: usize) -> Option<String> {
    let mut trits = vec![0i8; tryte_length * 3];
    let mut number = value.unsigned_abs();
    let sign: i8 = if value >= 0 { 1 } else { -1 };

    for trit in trits.iter_mut() {
        let remainder = (number % 3) as i8;
        let quotient = number / 3;
        if remainder > 1 {
            *trit = -sign;
            number = quotient + 1;
        } else {
            *trit = sign * remainder;
            number = quotient;
        }
    }
    if number != 0 {
        return None;
    }
    Some(from_trits(&trits))
}

// 9841 = (3^9 - 1) / 2, the largest value of one tryte triplet.
const MAX_TRYTE_TRIPLET_ABS: i128 = 9841;

/// Encode ASCII text: 2 characters become one tryte triplet.
///
/// Non-ASCII bytes are not representable and encode as `?`.
pub fn from_ascii(ascii: &str) -> String {
    let mut chars: Vec<u8> = ascii
        .bytes()
        .map(|c| if c < 127 { c } else { b'?' })
        .collect();
    if chars.len() % 2 != 0 {
        chars.push(0);
    }
    let mut trytes = String::with_capacity(chars.len() / 2 * 3);
    for pair in chars.chunks_exact(2) {
        let value = pair[0] as i128 * 127 + pair[1] as i128 - MAX_TRYTE_TRIPLET_ABS;
        let triplet =
            from_number(value, 3).expect("one tryte triplet always holds two sub-127 bytes");
        trytes.push_str(&triplet);
    }
    trytes
}

/// Decode ASCII text encoded by [`from_ascii`], ignoring trailing blanks.
pub fn to_ascii(trytes: &str) -> String {
    let unpadded = unpad_right(trytes);
    let padded_len = unpadded.len() + 2 - (unpadded.len() + 2) % 3;
    let padded = pad_right(unpadded, padded_len);

    let mut ascii = String::with_capacity(padded.len() / 3 * 2);
    for triplet in padded.as_bytes().chunks_exact(3) {
        let triplet = std::str::from_utf8(triplet).expect("trytes are ascii");
        let value = to_number(triplet).expect("one triplet always fits") + MAX_TRYTE_TRIPLET_ABS;
        ascii.push((value / 127) as u8 as char);
        ascii.push((value % 127) as u8 as char);
    }
    if ascii.ends_with('\0') {
        ascii.pop();
    }
    ascii
}

/// Right-pad with the blank symbol `9` up to `length`.
pub fn pad_right(trytes: &str, length: usize) -> String {
    debug_assert!(trytes.len() <= length);
    let mut padded = String::with_capacity(length);
    padded.push_str(trytes);
    while padded.len() < length {
        padded.push('9');
    }
    padded
}

/// Strip trailing blank symbols.
pub fn unpad_right(trytes: &str) -> &str {
    trytes.trim_end_matches('9')
}

/// A uniformly random tryte sequence, for nonces and test fixtures.
pub fn random_trytes(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| tryte_char(rng.gen_range(0..27)))
        .collect()
}
