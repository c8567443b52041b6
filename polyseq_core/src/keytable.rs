//! Key-table derivation from the shared session scalars.
//!
//! Both endpoints run the same derivation over `(P, Q, S, num_keys)` and must
//! land on identical tables, so every step is unsigned 64-bit wrapping
//! arithmetic. Addition, multiplication and XOR only carry upward, which makes
//! the result equal to an unbounded evaluation masked to 64 bits.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::cipher::PolyError;

/// Largest table either endpoint will derive. `num_keys` arrives from the
/// peer, so larger counts are rejected before anything is allocated.
pub const MAX_KEYS: usize = 1 << 16;

/// Scalars both endpoints hold once first contact completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedParameters {
    pub p: u64,
    pub q: u64,
    pub s: u64,
    pub num_keys: usize,
}

impl SharedParameters {
    pub const fn new(p: u64, q: u64, s: u64, num_keys: usize) -> Self {
        Self { p, q, s, num_keys }
    }

    /// Same parameters with a replacement salt, as carried by a key update.
    pub const fn with_salt(self, s: u64) -> Self {
        Self { s, ..self }
    }
}

/// Ordered, non-empty sequence of 64-bit keys. Regenerated wholesale, never
/// edited in place.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyTable {
    keys: Vec<u64>,
}

impl KeyTable {
    /// Derives the table for `params`, discarding the final salt.
    pub fn generate(params: &SharedParameters) -> Result<Self, PolyError> {
        derive_key_table(params.p, params.q, params.s, params.num_keys).map(|(table, _)| table)
    }

    /// Wraps existing keys, e.g. ones loaded from a fixture.
    pub fn from_keys(keys: Vec<u64>) -> Result<Self, PolyError> {
        if keys.is_empty() {
            return Err(PolyError::invalid("num_keys", "key table must hold at least one key"));
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Key used for the byte at `position` of a message sealed under `psn`:
    /// `table[(position + psn) mod len]`.
    pub fn key_for(&self, position: usize, psn: u64) -> u64 {
        let len = self.keys.len() as u64;
        let index = (position as u64 % len + psn % len) % len;
        self.keys[index as usize]
    }
}

impl fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTable")
            .field("len", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl Drop for KeyTable {
    fn drop(&mut self) {
        self.keys.zeroize();
    }
}

/// Derives `num_keys` keys and returns them with the salt reached after the
/// last mutation step.
pub fn derive_key_table(
    p: u64,
    q: u64,
    s: u64,
    num_keys: usize,
) -> Result<(KeyTable, u64), PolyError> {
    check_key_count(num_keys)?;
    let mut keys = Vec::with_capacity(num_keys);
    let mut current_s = s;
    for _ in 0..num_keys {
        let p0 = scramble(p, current_s);
        keys.push(generation(p0, q));
        current_s = mutation(current_s, q);
    }
    debug!("derived key table len={} final_s={}", keys.len(), current_s);
    Ok((KeyTable { keys }, current_s))
}

/// Converts a key count as carried on the wire. Values outside
/// `1..=MAX_KEYS` are rejected.
pub fn checked_key_count(num_keys: i64) -> Result<usize, PolyError> {
    if num_keys <= 0 {
        return Err(PolyError::invalid(
            "num_keys",
            format!("must be positive, got {num_keys}"),
        ));
    }
    let count = usize::try_from(num_keys)
        .map_err(|_| PolyError::invalid("num_keys", format!("{num_keys} exceeds platform size")))?;
    check_key_count(count)?;
    Ok(count)
}

pub(crate) fn check_key_count(num_keys: usize) -> Result<(), PolyError> {
    if num_keys == 0 {
        return Err(PolyError::invalid("num_keys", "must be positive, got 0"));
    }
    if num_keys > MAX_KEYS {
        return Err(PolyError::invalid(
            "num_keys",
            format!("{num_keys} exceeds the limit of {MAX_KEYS}"),
        ));
    }
    Ok(())
}

#[inline]
pub fn scramble(x: u64, y: u64) -> u64 {
    x.wrapping_mul(y) ^ x.wrapping_add(y)
}

#[inline]
pub fn generation(a: u64, b: u64) -> u64 {
    a.wrapping_add(b) ^ a.wrapping_mul(b)
}

#[inline]
pub fn mutation(s: u64, q: u64) -> u64 {
    s.wrapping_add(q) ^ s.wrapping_mul(q)
}
