//! PSN-driven selection of the transform chain.
//!
//! The order depends on the PSN alone, so sender and receiver rebuild it
//! without exchanging anything beyond the PSN itself. Indices may repeat; with
//! three transforms every PSN in `0..=15` yields a single transform applied
//! three times.

use serde::Serialize;

use crate::transform::{TRANSFORM_COUNT, Transform};

/// Indices into a library of `num_functions` transforms for `psn`.
pub fn sequence_indices(psn: u64, num_functions: usize) -> Vec<usize> {
    if num_functions == 0 {
        return Vec::new();
    }
    let modulus = num_functions as u64;
    let mut state = psn;
    let mut indices = Vec::with_capacity(num_functions);
    for _ in 0..num_functions {
        indices.push((state % modulus) as usize);
        state = (state >> 2) | ((state & 0b11) << 2);
    }
    indices
}

/// Transform chain selected for one PSN.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionSequence {
    psn: u64,
    steps: [Transform; TRANSFORM_COUNT],
}

impl FunctionSequence {
    pub fn for_psn(psn: u64) -> Self {
        let mut steps = [Transform::Xor; TRANSFORM_COUNT];
        let selected = sequence_indices(psn, TRANSFORM_COUNT)
            .into_iter()
            .filter_map(Transform::from_index);
        // indices are reduced mod TRANSFORM_COUNT, so every slot is filled
        for (step, transform) in steps.iter_mut().zip(selected) {
            *step = transform;
        }
        Self { psn, steps }
    }

    pub fn psn(&self) -> u64 {
        self.psn
    }

    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    /// Runs the chain forward over one byte.
    #[inline]
    pub fn apply(&self, byte: u8, key: u64) -> u8 {
        self.steps
            .iter()
            .fold(byte, |acc, transform| transform.encode(acc, key))
    }

    /// Undoes [`apply`](Self::apply): inverses in reverse order.
    #[inline]
    pub fn invert(&self, byte: u8, key: u64) -> u8 {
        self.steps
            .iter()
            .rev()
            .fold(byte, |acc, transform| transform.decode(acc, key))
    }
}
