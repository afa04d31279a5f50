//! Argon2d Cache Initialization for RandomX
//!
//! RandomX uses Argon2d to initialize the 256 MiB cache from a key.
//! Parameters:
//! - Memory: 262144 KiB (256 MiB)
//! - Iterations: 3
//! - Lanes: 1
//! - Salt: "RandomX\x03"
//!
//! The cache is the Argon2 memory itself, not the tag: blocks are filled
//! with `Argon2::fill_memory` (an empty output length goes into H0) and
//! kept as-is.

use ::argon2::{Algorithm, Argon2, Block, Params, Version};

use crate::config::{ARGON_ITERATIONS, ARGON_LANES, ARGON_MEMORY, ARGON_SALT, ARGON_BLOCK_SIZE};
use crate::error::{Error, Result};

/// Allocates zeroed Argon2 blocks, reporting failure instead of aborting.
pub fn allocate_blocks(count: usize) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    blocks
        .try_reserve_exact(count)
        .map_err(|_| Error::Allocation {
            what: "cache",
            bytes: count * ARGON_BLOCK_SIZE,
        })?;
    blocks.resize_with(count, Block::default);
    Ok(blocks)
}

/// Runs Argon2d over `blocks` with the RandomX parameters.
pub fn fill_cache(key: &[u8], blocks: &mut [Block]) -> Result<()> {
    let params = Params::new(ARGON_MEMORY, ARGON_ITERATIONS, ARGON_LANES, None)?;
    let argon2 = Argon2::new(Algorithm::Argon2d, Version::V0x13, params);
    argon2.fill_memory(key, ARGON_SALT, blocks)?;
    Ok(())
}
