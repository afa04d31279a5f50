//! RandomX Cache
//!
//! 256 MiB of Argon2d memory plus the eight superscalar programs derived from
//! the same key. Light-mode VMs compute dataset items from it on demand;
//! the full dataset is materialized from it once.

use std::time::Instant;

use ::argon2::Block;

use crate::argon2::{allocate_blocks, fill_cache};
use crate::blake2b::Blake2Generator;
use crate::config::{ARGON_BLOCK_SIZE, ARGON_MEMORY, CACHE_ACCESSES, CACHE_LINE_MASK, CACHE_LINE_SIZE, REGISTER_COUNT};
use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::keys::keys;
use crate::superscalar::SuperscalarProgram;

/// One dataset item: eight 64-bit words.
pub type RegisterLine = [u64; REGISTER_COUNT];

/// Key-derived memory shared by every VM using that key.
pub struct Cache {
    blocks: Vec<Block>,
    programs: Vec<SuperscalarProgram>,
    key: Option<Vec<u8>>,
}

impl Cache {
    /// Reserves the cache memory. The cache is unusable until [`Cache::init`].
    pub fn new(flags: Flags) -> Result<Self> {
        if flags.contains(Flags::JIT) {
            return Err(Error::Unsupported("JIT compilation"));
        }
        if flags.contains(Flags::LARGE_PAGES) {
            return Err(Error::Unsupported("large pages"));
        }
        Ok(Self {
            blocks: allocate_blocks(ARGON_MEMORY as usize)?,
            programs: Vec::with_capacity(CACHE_ACCESSES),
            key: None,
        })
    }

    /// Fills the cache from `key`. Re-initializing with the current key does
    /// nothing.
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    pub fn init(&mut self, key: &[u8]) -> Result<()> {
        if self.key.as_deref() == Some(key) {
            tracing::debug!("cache already initialized for this key");
            return Ok(());
        }
        self.key = None;

        let start = Instant::now();
        fill_cache(key, &mut self.blocks)?;
        tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "argon2d fill complete");

        let mut gen = Blake2Generator::new(key, 0);
        self.programs.clear();
        for i in 0..CACHE_ACCESSES {
            let program = SuperscalarProgram::generate(&mut gen);
            tracing::debug!(
                program = i,
                instructions = program.len(),
                address_register = program.address_register(),
                "superscalar program"
            );
            self.programs.push(program);
        }

        self.key = Some(key.to_vec());
        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "cache initialized");
        Ok(())
    }

    /// Key the cache was last initialized with.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// True once [`Cache::init`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// Superscalar programs in execution order.
    pub fn programs(&self) -> &[SuperscalarProgram] {
        &self.programs
    }

    /// The 64-byte cache line selected by a register value.
    pub fn mix_block(&self, register: u64) -> &[u64] {
        let offset = (register & CACHE_LINE_MASK) as usize * CACHE_LINE_SIZE;
        let block: &[u64] = self.blocks[offset / ARGON_BLOCK_SIZE].as_ref();
        let word = (offset % ARGON_BLOCK_SIZE) / 8;
        &block[word..word + REGISTER_COUNT]
    }

    /// 64-bit word `index` of the raw Argon2 memory.
    pub fn word(&self, index: usize) -> u64 {
        let words_per_block = ARGON_BLOCK_SIZE / 8;
        let block: &[u64] = self.blocks[index / words_per_block].as_ref();
        block[index % words_per_block]
    }

    /// Computes dataset item `item_number`.
    ///
    /// # Panics
    /// If the cache has not been initialized.
    pub fn dataset_item(&self, item_number: u64) -> RegisterLine {
        assert!(self.is_initialized(), "cache used before init");
        let constants = &keys().superscalar;

        let mut regs = [0u64; REGISTER_COUNT];
        regs[0] = (item_number + 1).wrapping_mul(constants[0]);
        for i in 1..REGISTER_COUNT {
            regs[i] = regs[0] ^ constants[i];
        }

        let mut register_value = item_number;
        for program in &self.programs {
            let mix = self.mix_block(register_value);
            program.execute(&mut regs);
            for (r, m) in regs.iter_mut().zip(mix) {
                *r ^= m;
            }
            register_value = regs[program.address_register()];
        }
        regs
    }
}

impl core::fmt::Debug for Cache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cache")
            .field("blocks", &self.blocks.len())
            .field("programs", &self.programs.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_flags() {
        assert!(matches!(Cache::new(Flags::JIT), Err(Error::Unsupported(_))));
        assert!(matches!(Cache::new(Flags::LARGE_PAGES), Err(Error::Unsupported(_))));
    }

    #[test]
    fn init_and_reinit() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        assert!(!cache.is_initialized());

        cache.init(b"test key 000").unwrap();
        assert_eq!(cache.key(), Some(&b"test key 000"[..]));
        assert_eq!(cache.programs().len(), CACHE_ACCESSES);
        assert_eq!(cache.word(0), 0x191e0e1d23c02186);

        let item = cache.dataset_item(0);
        cache.init(b"test key 000").unwrap();
        assert_eq!(cache.dataset_item(0), item);

        cache.init(b"test key 001").unwrap();
        assert_eq!(cache.key(), Some(&b"test key 001"[..]));
        assert_ne!(cache.word(0), 0x191e0e1d23c02186);
        assert_ne!(cache.dataset_item(0), item);
    }

    #[test]
    #[should_panic(expected = "cache used before init")]
    fn item_before_init_panics() {
        let cache = Cache::new(Flags::DEFAULT).unwrap();
        let _ = cache.dataset_item(0);
    }
}
