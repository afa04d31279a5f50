//! RandomX Scratchpad
//!
//! 2 MiB of VM working memory. Every address reaching these accessors has
//! already been masked to the L1, L2 or L3 window, so it is 8-byte aligned
//! and in bounds.

use crate::aes::AesBackend;
use crate::config::SCRATCHPAD_L3;
use crate::error::{Error, Result};

/// Scratchpad manager
pub struct Scratchpad {
    memory: Box<[u8]>,
}

impl Scratchpad {
    /// Create a zeroed scratchpad
    pub fn new() -> Result<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(SCRATCHPAD_L3)
            .map_err(|_| Error::Allocation {
                what: "scratchpad",
                bytes: SCRATCHPAD_L3,
            })?;
        memory.resize(SCRATCHPAD_L3, 0);
        Ok(Self {
            memory: memory.into_boxed_slice(),
        })
    }

    /// Fill from `seed` with the 1-round AES generator; `seed` is advanced.
    pub fn init(&mut self, aes: AesBackend, seed: &mut [u8; 64]) {
        aes.fill_aes_1rx4(seed, &mut self.memory);
    }

    /// Read 64-bit value
    #[inline]
    pub fn load64(&self, addr: u32) -> u64 {
        let addr = addr as usize;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.memory[addr..addr + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Write 64-bit value
    #[inline]
    pub fn store64(&mut self, addr: u32, value: u64) {
        let addr = addr as usize;
        self.memory[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Two signed 32-bit integers at `addr`, converted to doubles.
    #[inline]
    pub fn load32f(&self, addr: u32) -> [f64; 2] {
        let word = self.load64(addr);
        [
            f64::from(word as u32 as i32),
            f64::from((word >> 32) as u32 as i32),
        ]
    }

    /// Get scratchpad as slice
    pub fn as_slice(&self) -> &[u8] {
        &self.memory
    }
}

impl core::fmt::Debug for Scratchpad {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scratchpad").field("len", &self.memory.len()).finish()
    }
}
