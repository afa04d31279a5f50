//! RandomX Hash Computation
//!
//! The hash computation flow:
//! 1. Blake2b-512 of the input seeds the scratchpad fill and the first program
//! 2. Eight programs run back to back; between them the register file is
//!    rehashed into the next seed
//! 3. The final scratchpad is AES-hashed over the A registers
//! 4. Blake2b-256 of the register file is the result

use std::sync::Arc;

use blake2::Digest;

use crate::blake2b::{blake2b_256, blake2b_512, Blake2b256};
use crate::cache::Cache;
use crate::config::{HASH_SIZE, PROGRAM_COUNT, REGISTER_FILE_SIZE};
use crate::error::Result;
use crate::flags::Flags;
use crate::vm::{RoundingGuard, Vm};

/// Offset of the A registers in the serialized register file.
const REGISTER_A_OFFSET: usize = REGISTER_FILE_SIZE - 64;

impl Vm {
    /// Compute the RandomX hash of `input`.
    ///
    /// Deterministic for a given cache key: mode and flags never change the
    /// result.
    pub fn calculate_hash(&mut self, input: &[u8]) -> [u8; HASH_SIZE] {
        let mut seed = blake2b_512(input);
        let aes = self.aes;
        self.scratchpad.init(aes, &mut seed);

        {
            let mut vm = RoundingGuard::new(self);
            for _ in 0..PROGRAM_COUNT - 1 {
                vm.run(&seed);
                seed = blake2b_512(&vm.reg.to_bytes());
            }
            vm.run(&seed);
        }

        let mut register_file = self.reg.to_bytes();
        let scratchpad_hash = self.aes.hash_aes_1rx4(self.scratchpad.as_slice());
        register_file[REGISTER_A_OFFSET..].copy_from_slice(&scratchpad_hash);
        blake2b_256(&register_file)
    }
}

/// One-shot light mode hash: builds a cache for `key` and a VM, then hashes.
///
/// `FULL_MEM` is ignored: building a 2 GiB dataset for a single hash never
/// pays off, and the digest is the same in both modes. Other flags are
/// checked as usual. Reuse a [`Cache`] and [`Vm`] when hashing more than
/// once per key.
pub fn calculate_hash(flags: Flags, key: &[u8], input: &[u8]) -> Result<[u8; HASH_SIZE]> {
    let flags = flags & !Flags::FULL_MEM;
    let mut cache = Cache::new(flags)?;
    cache.init(key)?;
    let mut vm = Vm::new(flags, Some(Arc::new(cache)), None)?;
    Ok(vm.calculate_hash(input))
}

/// Commitment binding `hash` to the `input` it was computed from:
/// Blake2b-256(input || hash).
pub fn calculate_commitment(input: &[u8], hash: &[u8; HASH_SIZE]) -> [u8; HASH_SIZE] {
    Blake2b256::new().chain_update(input).chain_update(hash).finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_appends_hash() {
        let hash = [0x11u8; HASH_SIZE];
        let mut joined = b"input".to_vec();
        joined.extend_from_slice(&hash);
        assert_eq!(calculate_commitment(b"input", &hash), blake2b_256(&joined));
        assert_ne!(calculate_commitment(b"inpuT", &hash), blake2b_256(&joined));
    }

    #[test]
    fn hash_is_deterministic_and_resets_rounding() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        cache.init(b"test key 000").unwrap();
        let mut vm = Vm::new(Flags::DEFAULT, Some(Arc::new(cache)), None).unwrap();

        let first = vm.calculate_hash(b"This is a test");
        assert_eq!(vm.registers().rounding, crate::softfloat::RoundingMode::Nearest);
        let other = vm.calculate_hash(b"Lorem ipsum dolor sit amet");
        assert_ne!(first, other);
        assert_eq!(vm.calculate_hash(b"This is a test"), first);
    }
}
