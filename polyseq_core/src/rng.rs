//! Sources for the responder-generated multiplier `Q`.
//!
//! A responder either answers every first contact with a fixed `Q` (the
//! classic server behaviour) or draws one from ChaCha20. The RNG is seeded
//! from OS entropy, or deterministically from a BLAKE3 hash of a label so
//! tests and demos can replay a session.

use blake3::Hasher;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

/// Multiplier the classic server answers with: a large prime.
pub const DEFAULT_Q: u64 = 32_452_843;

#[derive(Clone, Debug)]
pub enum QSource {
    Fixed(u64),
    Drawn(ChaCha20Rng),
}

impl QSource {
    pub fn fixed(q: u64) -> Self {
        QSource::Fixed(q)
    }

    pub fn from_entropy() -> Self {
        QSource::Drawn(ChaCha20Rng::from_entropy())
    }

    /// Reproducible draws keyed by `label`.
    pub fn seeded(label: &[u8]) -> Self {
        QSource::Drawn(derive_labeled_rng(label))
    }

    /// Next multiplier; drawn values are never zero.
    pub fn next_q(&mut self) -> u64 {
        match self {
            QSource::Fixed(q) => *q,
            QSource::Drawn(rng) => rng.gen_range(1..=u64::MAX),
        }
    }
}

impl Default for QSource {
    fn default() -> Self {
        QSource::Fixed(DEFAULT_Q)
    }
}

/// Deterministic RNG derived from a label.
pub fn derive_labeled_rng(label: &[u8]) -> ChaCha20Rng {
    let mut hasher = Hasher::new();
    hasher.update(b"polyseq::q-source");
    hasher.update(label);
    ChaCha20Rng::from_seed(*hasher.finalize().as_bytes())
}
