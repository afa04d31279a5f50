//! RandomX Configuration Constants
//!
//! These values are the Monero (default) RandomX parameters. Every hash
//! produced by this crate depends on them bit-for-bit, so none of them are
//! tunable at runtime.

// =============================================================================
// ARGON2D (CACHE)
// =============================================================================

/// Cache size in KiB (one Argon2 block per KiB).
pub const ARGON_MEMORY: u32 = 262_144;
/// Number of Argon2d passes over the cache.
pub const ARGON_ITERATIONS: u32 = 3;
/// Number of Argon2d lanes.
pub const ARGON_LANES: u32 = 1;
/// Argon2d salt.
pub const ARGON_SALT: &[u8] = b"RandomX\x03";
/// Argon2 block size in bytes.
pub const ARGON_BLOCK_SIZE: usize = 1024;
/// 64-bit words per Argon2 block.
pub const ARGON_BLOCK_WORDS: usize = ARGON_BLOCK_SIZE / 8;

/// Cache size in bytes: 256 MiB.
pub const CACHE_SIZE: usize = ARGON_MEMORY as usize * ARGON_BLOCK_SIZE;

/// Number of superscalar programs (and cache reads) per dataset item.
pub const CACHE_ACCESSES: usize = 8;

// =============================================================================
// DATASET
// =============================================================================

/// Size of one dataset item / cache line in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Dataset base size: 2 GiB.
pub const DATASET_BASE_SIZE: u64 = 2_147_483_648;
/// Dataset extra size.
pub const DATASET_EXTRA_SIZE: u64 = 33_554_368;
/// Total dataset size in bytes.
pub const DATASET_SIZE: u64 = DATASET_BASE_SIZE + DATASET_EXTRA_SIZE;

/// Number of dataset items (34078719).
pub const DATASET_ITEM_COUNT: u64 = DATASET_SIZE / CACHE_LINE_SIZE as u64;
/// Number of items covered by the extra size.
pub const DATASET_EXTRA_ITEMS: u64 = DATASET_EXTRA_SIZE / CACHE_LINE_SIZE as u64;

/// Mask aligning `ma`/`mx` to a cache line inside the dataset base size.
pub const CACHE_LINE_ALIGN_MASK: u64 = (DATASET_BASE_SIZE - 1) & !(CACHE_LINE_SIZE as u64 - 1);

/// Mask selecting a cache line index inside the Argon2 cache.
pub const CACHE_LINE_MASK: u64 = (CACHE_SIZE / CACHE_LINE_SIZE) as u64 - 1;

// =============================================================================
// SUPERSCALAR
// =============================================================================

/// Target latency of a superscalar program in cycles.
pub const SUPERSCALAR_LATENCY: usize = 170;
/// Upper bound on superscalar program length.
pub const SUPERSCALAR_MAX_SIZE: usize = 3 * SUPERSCALAR_LATENCY + 2;

// =============================================================================
// VM PROGRAM
// =============================================================================

/// Program size in instructions.
pub const PROGRAM_SIZE: usize = 256;
/// Number of iterations per program.
pub const PROGRAM_ITERATIONS: usize = 2048;
/// Number of chained programs per hash.
pub const PROGRAM_COUNT: usize = 8;

/// Size of one raw program instruction in bytes.
pub const INSTRUCTION_SIZE: usize = 8;
/// Bytes of entropy preceding the program in the per-round buffer.
pub const ENTROPY_SIZE: usize = 16 * 8;
/// Per-round buffer: entropy followed by the raw program.
pub const PROGRAM_BUFFER_SIZE: usize = ENTROPY_SIZE + PROGRAM_SIZE * INSTRUCTION_SIZE;

/// Number of integer registers.
pub const REGISTER_COUNT: usize = 8;
/// Number of floating point register pairs per group.
pub const REGISTER_COUNT_FLT: usize = 4;
/// Register file size in bytes (R, F, E, A).
pub const REGISTER_FILE_SIZE: usize = REGISTER_COUNT * 8 + 3 * REGISTER_COUNT_FLT * 16;

/// Register whose IADD_RS form carries a displacement (x86 r13).
pub const REGISTER_NEEDS_DISPLACEMENT: usize = 5;

/// Output digest size in bytes.
pub const HASH_SIZE: usize = 32;

// =============================================================================
// SCRATCHPAD
// =============================================================================

/// Scratchpad L3 size: 2 MiB.
pub const SCRATCHPAD_L3: usize = 2_097_152;
/// Scratchpad L2 size: 256 KiB.
pub const SCRATCHPAD_L2: usize = 262_144;
/// Scratchpad L1 size: 16 KiB.
pub const SCRATCHPAD_L1: usize = 16_384;

/// 8-byte aligned L1 address mask.
pub const SCRATCHPAD_L1_MASK: u32 = ((SCRATCHPAD_L1 / 8 - 1) * 8) as u32;
/// 8-byte aligned L2 address mask.
pub const SCRATCHPAD_L2_MASK: u32 = ((SCRATCHPAD_L2 / 8 - 1) * 8) as u32;
/// 8-byte aligned L3 address mask.
pub const SCRATCHPAD_L3_MASK: u32 = ((SCRATCHPAD_L3 / 8 - 1) * 8) as u32;
/// 64-byte aligned L3 address mask.
pub const SCRATCHPAD_L3_MASK64: u64 = ((SCRATCHPAD_L3 / 64 - 1) * 64) as u64;

// =============================================================================
// BRANCHES AND STORES
// =============================================================================

/// Number of condition bits tested by CBRANCH.
pub const JUMP_BITS: u32 = 8;
/// Lowest condition bit offset of CBRANCH.
pub const JUMP_OFFSET: u32 = 8;
/// Unshifted CBRANCH condition mask.
pub const CONDITION_MASK: u64 = (1 << JUMP_BITS) - 1;
/// ISTORE mod values at or above this threshold always address L3.
pub const STORE_L3_CONDITION: u8 = 14;

// =============================================================================
// FLOATING POINT
// =============================================================================

/// Mantissa width of an IEEE-754 double.
pub const MANTISSA_SIZE: u32 = 52;
/// Mantissa mask.
pub const MANTISSA_MASK: u64 = (1 << MANTISSA_SIZE) - 1;
/// Exponent width of an IEEE-754 double.
pub const EXPONENT_SIZE: u32 = 11;
/// Exponent mask (unshifted).
pub const EXPONENT_MASK: u64 = (1 << EXPONENT_SIZE) - 1;
/// Exponent bias.
pub const EXPONENT_BIAS: u64 = 1023;
/// Exponent bits kept from the loaded value of an E register.
pub const DYNAMIC_EXPONENT_BITS: u32 = 4;
/// Exponent bits forced by the per-round E mask.
pub const STATIC_EXPONENT_BITS: u32 = 4;
/// Constant high exponent bits of E registers.
pub const CONST_EXPONENT_BITS: u64 = 0x300;
/// Mantissa plus dynamic exponent bits of an E register.
pub const DYNAMIC_MANTISSA_MASK: u64 = (1 << (MANTISSA_SIZE + DYNAMIC_EXPONENT_BITS)) - 1;
/// Low mantissa bits taken from entropy for the E mask.
pub const MASK_22_BIT: u64 = (1 << 22) - 1;

/// FSCAL_R xor pattern: sign bit plus exponent bits 4..8.
pub const SCALE_MASK: u64 = 0x80F0_0000_0000_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes() {
        assert_eq!(CACHE_SIZE, 268_435_456);
        assert_eq!(DATASET_ITEM_COUNT, 34_078_719);
        assert_eq!(DATASET_EXTRA_ITEMS, 524_287);
        assert_eq!(CACHE_LINE_ALIGN_MASK, 0x7FFF_FFC0);
        assert_eq!(SUPERSCALAR_MAX_SIZE, 512);
        assert_eq!(REGISTER_FILE_SIZE, 256);
        assert_eq!(PROGRAM_BUFFER_SIZE, 2176);
    }

    #[test]
    fn scratchpad_masks() {
        assert_eq!(SCRATCHPAD_L1_MASK, 16_376);
        assert_eq!(SCRATCHPAD_L2_MASK, 262_136);
        assert_eq!(SCRATCHPAD_L3_MASK, 2_097_144);
        assert_eq!(SCRATCHPAD_L3_MASK64, 2_097_088);
    }
}
