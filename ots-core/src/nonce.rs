//! Random nonces that blind file digests before aggregation

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use ots_types::{Op, Result};

use crate::timestamp::Timestamp;

/// Nonce size in bytes
pub const NONCE_SIZE: usize = 16;

/// Generator for cryptographically secure random nonces.
///
/// Uses `StdRng` seeded from OS entropy, which is cryptographically secure
/// and implements `Send` for use across threads.
pub struct NonceGenerator {
    rng: StdRng,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Generate a new random nonce
    pub fn generate(&mut self) -> [u8; NONCE_SIZE] {
        let mut bytes = [0u8; NONCE_SIZE];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    /// Extend `timestamp` with `Append(nonce)` then SHA256 and return the
    /// resulting leaf
    ///
    /// Calendars only ever see the leaf, never the file digest itself.
    pub fn blind(&mut self, timestamp: &Timestamp) -> Result<Timestamp> {
        let nonce = self.generate();
        timestamp.add(Op::Append(nonce.to_vec()))?.add(Op::sha256())
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_generation() {
        let mut gen = NonceGenerator::new();
        let nonce1 = gen.generate();
        let nonce2 = gen.generate();

        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn test_many_nonces() {
        let mut gen = NonceGenerator::new();
        let mut nonces = std::collections::HashSet::new();

        for _ in 0..1000 {
            let nonce = gen.generate();
            assert!(nonces.insert(nonce), "Duplicate nonce generated");
        }
    }

    #[test]
    fn test_blind_adds_two_edges() {
        let mut gen = NonceGenerator::new();
        let root = Timestamp::new(vec![0xaa; 32]);
        let leaf = gen.blind(&root).unwrap();

        let (append, nonced) = root.ops().remove(0);
        match &append {
            Op::Append(nonce) => assert_eq!(nonce.len(), NONCE_SIZE),
            other => panic!("expected append, got {}", other),
        }
        assert_eq!(nonced.msg().len(), 32 + NONCE_SIZE);

        let (digest, child) = nonced.ops().remove(0);
        assert_eq!(digest, Op::sha256());
        assert!(child.ptr_eq(&leaf));
        assert_eq!(leaf.msg().len(), 32);
    }

    #[test]
    fn test_blinding_twice_differs() {
        let mut gen = NonceGenerator::new();
        let root = Timestamp::new(vec![0xbb; 32]);
        let a = gen.blind(&root).unwrap();
        let b = gen.blind(&root).unwrap();
        assert_ne!(a.msg(), b.msg());
        assert_eq!(root.ops().len(), 2);
    }
}
