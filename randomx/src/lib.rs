//! Pure-Rust RandomX Implementation
//!
//! RandomX is the memory-hard proof-of-work hash used by Monero. A key
//! seeds a 256 MiB cache (Argon2d plus eight superscalar programs) from
//! which a 2 GiB dataset is derived; each hash runs eight random programs
//! on a VM that reads that dataset.
//!
//! ```no_run
//! use std::sync::Arc;
//! use randomx::{Cache, Flags, Vm};
//!
//! # fn main() -> randomx::Result<()> {
//! let flags = Flags::recommended();
//! let mut cache = Cache::new(flags)?;
//! cache.init(b"RandomX example key\0")?;
//! let mut vm = Vm::new(flags, Some(Arc::new(cache)), None)?;
//! let hash = vm.calculate_hash(b"RandomX example input\0");
//! # let _ = hash;
//! # Ok(())
//! # }
//! ```
//!
//! Reference: https://github.com/tevador/RandomX/blob/master/doc/specs.md

pub mod aes;
pub mod argon2;
pub mod blake2b;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod flags;
pub mod hash;
pub mod keys;
pub mod program;
pub mod scratchpad;
pub mod softfloat;
pub mod superscalar;
pub mod vm;

pub use cache::{Cache, RegisterLine};
pub use config::{DATASET_ITEM_COUNT, HASH_SIZE};
pub use dataset::{Dataset, DatasetView};
pub use error::{Error, Result};
pub use flags::Flags;
pub use hash::{calculate_commitment, calculate_hash};
pub use softfloat::{e_mask, mask_register_exponent_mantissa, scale_negate, small_positive_float_bits, RoundingMode};
pub use superscalar::reciprocal;
pub use vm::{RegisterFile, Vm};
