//! # Curl Sponge
//!
//! The domain-specific hash deriving transaction identities: a 729-trit
//! sponge that absorbs 243-trit blocks and squeezes a 243-trit (81-tryte)
//! digest after a fixed number of rounds per absorption.
//!
//! Determinism is the only property the protocol relies on here: two nodes
//! must derive the same hash from the same payload.

use crate::trytes;

/// Digest width in trits.
pub const HASH_LENGTH: usize = 243;

const STATE_LENGTH: usize = 3 * HASH_LENGTH;

// state[i] = f(a, b) for trit pair (a, b), indexed by a + 3b + 4.
const TRUTH_TABLE: [i8; 9] = [1, 0, -1, 1, -1, 0, -1, 1, 0];

/// Hash a tryte payload whose trit length is a multiple of [`HASH_LENGTH`].
pub fn hash_trytes(payload: &str, rounds: usize) -> String {
    let trits = trytes::to_trits(payload);
    debug_assert!(trits.len() % HASH_LENGTH == 0);

    let mut state = [0i8; STATE_LENGTH];
    for block in trits.chunks(HASH_LENGTH) {
        state[..block.len()].copy_from_slice(block);
        transform(&mut state, rounds);
    }
    trytes::from_trits(&state[..HASH_LENGTH])
}

fn transform(state: &mut [i8; STATE_LENGTH], rounds: usize) {
    let mut index = 0usize;
    for _ in 0..rounds {
        let previous = *state;
        for trit in state.iter_mut() {
            let a = previous[index];
            index = if index < 365 { index + 364 } else { index - 365 };
            let b = previous[index];
            *trit = TRUTH_TABLE[(a + 3 * b + 4) as usize];
        }
    }
}
