//! Blinding nonce generation for aggregation leaves

use kts_types::Nonce;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Source of per-leaf blinding nonces.
///
/// `StdRng` seeded from OS entropy is cryptographically secure and `Send`,
/// so one generator can live inside the aggregator task.
pub struct NonceGenerator {
    rng: StdRng,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn generate(&mut self) -> Nonce {
        let mut bytes = [0u8; Nonce::LEN];
        self.rng.fill_bytes(&mut bytes);
        Nonce::new(bytes)
    }

    /// One nonce per leaf of a round
    pub fn generate_batch(&mut self, count: usize) -> Vec<Nonce> {
        (0..count).map(|_| self.generate()).collect()
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
