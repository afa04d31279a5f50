//! Derived key material
//!
//! AES generator/hash keys and the SuperscalarHash register constants are
//! all Blake2b digests of fixed ASCII labels. They are derived once per
//! process and handed out by shared reference.

use std::sync::OnceLock;

use crate::blake2b::{blake2b_256, blake2b_512};

/// One AES round key as four little-endian columns.
pub type AesKey = [u32; 4];

/// All fixed key material used by the hash.
#[derive(Debug)]
pub struct Keys {
    /// Keys of the 1-round scratchpad generator.
    pub aes_generator_1r: [AesKey; 4],
    /// Keys of the 4-round program generator.
    pub aes_generator_4r: [AesKey; 8],
    /// Initial state of the scratchpad hash.
    pub aes_hash_1r_state: [AesKey; 4],
    /// Finalization keys of the scratchpad hash.
    pub aes_hash_1r_xkeys: [AesKey; 2],
    /// Register initialization constants for dataset items.
    pub superscalar: [u64; 8],
}

static KEYS: OnceLock<Keys> = OnceLock::new();

/// Process-wide key material.
pub fn keys() -> &'static Keys {
    KEYS.get_or_init(Keys::derive)
}

impl Keys {
    fn derive() -> Self {
        let generator_4r_lo = aes_keys::<4>(&blake2b_512(b"RandomX AesGenerator4R keys 0-3"));
        let generator_4r_hi = aes_keys::<4>(&blake2b_512(b"RandomX AesGenerator4R keys 4-7"));
        let mut aes_generator_4r = [[0u32; 4]; 8];
        aes_generator_4r[..4].copy_from_slice(&generator_4r_lo);
        aes_generator_4r[4..].copy_from_slice(&generator_4r_hi);

        Self {
            aes_generator_1r: aes_keys::<4>(&blake2b_512(b"RandomX AesGenerator1R keys")),
            aes_generator_4r,
            aes_hash_1r_state: aes_keys::<4>(&blake2b_512(b"RandomX AesHash1R state")),
            aes_hash_1r_xkeys: aes_keys::<2>(&blake2b_256(b"RandomX AesHash1R xkeys")),
            superscalar: superscalar_constants(&blake2b_512(b"RandomX SuperScalarHash initialize")),
        }
    }
}

fn aes_keys<const N: usize>(data: &[u8]) -> [AesKey; N] {
    core::array::from_fn(|i| {
        core::array::from_fn(|j| {
            let at = i * 16 + j * 4;
            u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
        })
    })
}

fn superscalar_constants(data: &[u8; 64]) -> [u64; 8] {
    let mut out = [0u64; 8];
    for (i, word) in out.iter_mut().enumerate().skip(1) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[i * 8..i * 8 + 8]);
        *word = u64::from_le_bytes(bytes);
    }
    // Knuth's LCG multiplier.
    out[0] = 6_364_136_223_846_793_005;
    out[1] = out[1].wrapping_add((1 << 33) + 700);
    out[3] = out[3].wrapping_add(1 << 14);
    out
}
