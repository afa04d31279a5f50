//! Error types shared by the cache, dataset and VM constructors.

use thiserror::Error;

/// Errors reported while acquiring resources or wiring a VM together.
///
/// Hashing itself cannot fail: once a [`Vm`](crate::Vm) exists every call to
/// `calculate_hash` runs to completion.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing memory for a cache, dataset or scratchpad could not be reserved.
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation {
        /// Which structure was being allocated.
        what: &'static str,
        /// Requested size in bytes.
        bytes: usize,
    },

    /// Argon2d rejected its parameters or failed while filling the cache.
    #[error("argon2 cache fill failed: {0}")]
    Argon2(#[from] ::argon2::Error),

    /// Light mode VM created or re-pointed without a cache.
    #[error("light mode requires an initialized cache")]
    MissingCache,

    /// Full mode VM created or re-pointed without a dataset.
    #[error("full mode requires a dataset")]
    MissingDataset,

    /// The supplied cache or dataset does not match the VM's `FULL_MEM` flag.
    #[error("{0} does not match the configured memory mode")]
    ModeMismatch(&'static str),

    /// The dataset worker pool could not be started.
    #[error("failed to start dataset workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A requested flag cannot be honoured on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Convenience alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
