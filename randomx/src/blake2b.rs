//! Blake2b Generator for RandomX
//!
//! Provides a stateful generator that produces deterministic random bytes
//! using Blake2b hashing. Drives superscalar program generation, one
//! generator per cache key.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};

/// Blake2b with a 256-bit output (a distinct parameter block, not a truncation).
pub type Blake2b256 = Blake2b<U32>;

/// Maximum number of seed bytes kept in the generator state.
const MAX_SEED_SIZE: usize = 60;

/// Blake2b-based random generator
pub struct Blake2Generator {
    /// Current state (64 bytes)
    state: [u8; 64],
    /// Current position in state
    position: usize,
}

impl Blake2Generator {
    /// Create a new generator from seed and nonce.
    ///
    /// The seed is truncated to 60 bytes; the nonce fills the last four.
    /// The state is rehashed before the first byte is handed out.
    pub fn new(seed: &[u8], nonce: u32) -> Self {
        let mut state = [0u8; 64];
        let len = seed.len().min(MAX_SEED_SIZE);
        state[..len].copy_from_slice(&seed[..len]);
        state[MAX_SEED_SIZE..].copy_from_slice(&nonce.to_le_bytes());
        Self {
            state,
            position: state.len(),
        }
    }

    /// Get next byte
    pub fn next_byte(&mut self) -> u8 {
        self.ensure(1);
        let byte = self.state[self.position];
        self.position += 1;
        byte
    }

    /// Get next u32 (little-endian).
    ///
    /// A u32 never straddles a rehash: if fewer than four bytes remain the
    /// tail is discarded.
    pub fn next_u32(&mut self) -> u32 {
        self.ensure(4);
        let p = self.position;
        let value = u32::from_le_bytes([
            self.state[p],
            self.state[p + 1],
            self.state[p + 2],
            self.state[p + 3],
        ]);
        self.position += 4;
        value
    }

    fn ensure(&mut self, needed: usize) {
        if self.position + needed > self.state.len() {
            self.rehash();
        }
    }

    /// Rehash state when exhausted
    fn rehash(&mut self) {
        self.state = blake2b_512(&self.state);
        self.position = 0;
    }
}

/// Blake2b-512 of `data`.
pub fn blake2b_512(data: &[u8]) -> [u8; 64] {
    Blake2b512::digest(data).into()
}

/// Blake2b-256 of `data`.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    Blake2b256::digest(data).into()
}
