//! Access key generation and comparison.
//!
//! Bootstrap and rotated keys are drawn from `[A-Za-z0-9]` using the
//! thread-local CSPRNG. Comparison runs in constant time for equal lengths.

use rand::Rng;
use rand::distr::Alphanumeric;
use subtle::ConstantTimeEq;

/// Generate an opaque secret of `length` alphanumeric characters
pub fn generate(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Compare two secrets without early exit on the first differing byte
pub fn equals(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
