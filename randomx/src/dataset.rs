//! RandomX Dataset
//!
//! The full dataset materializes every item the cache can produce
//! (34,078,719 lines of 64 bytes, a little over 2 GiB). Light mode skips
//! it and recomputes the requested item from the cache on every read;
//! [`DatasetView`] hides the difference from the VM.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::cache::{Cache, RegisterLine};
use crate::config::{CACHE_LINE_SIZE, DATASET_ITEM_COUNT};
use crate::error::{Error, Result};
use crate::flags::Flags;

/// Fully materialized dataset.
pub struct Dataset {
    cache: Arc<Cache>,
    items: Vec<RegisterLine>,
}

impl Dataset {
    /// Reserves dataset memory for `cache`. Items stay zero until built.
    ///
    /// `flags` must include `FULL_MEM`; a dataset is never built for light mode.
    pub fn new(flags: Flags, cache: Arc<Cache>) -> Result<Self> {
        if !flags.contains(Flags::FULL_MEM) {
            return Err(Error::ModeMismatch("dataset"));
        }
        if flags.contains(Flags::LARGE_PAGES) {
            return Err(Error::Unsupported("large pages"));
        }
        let count = DATASET_ITEM_COUNT as usize;
        let mut items = Vec::new();
        items.try_reserve_exact(count).map_err(|_| Error::Allocation {
            what: "dataset",
            bytes: count * CACHE_LINE_SIZE,
        })?;
        items.resize(count, [0u64; 8]);
        Ok(Self { cache, items })
    }

    /// Number of items, always `DATASET_ITEM_COUNT`.
    pub fn item_count(&self) -> u64 {
        self.items.len() as u64
    }

    /// Cache the items are derived from.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Item `index` as stored.
    pub fn item(&self, index: u64) -> &RegisterLine {
        &self.items[index as usize]
    }

    /// Computes items `[start, start + count)` on the calling thread.
    ///
    /// # Panics
    /// If the range leaves the dataset or the cache is not initialized.
    pub fn build(&mut self, start: u64, count: u64) {
        let total = self.item_count();
        assert!(
            start < total && count <= total && start + count <= total,
            "dataset range {start}+{count} exceeds {total} items"
        );
        let cache = &self.cache;
        let range = start as usize..(start + count) as usize;
        for (item, line) in (start..).zip(&mut self.items[range]) {
            *line = cache.dataset_item(item);
        }
    }

    /// Computes the whole dataset on a dedicated pool of `workers` threads.
    /// Worker `i` builds items `[i*N/workers, (i+1)*N/workers)`.
    #[tracing::instrument(skip(self))]
    pub fn build_parallel(&mut self, workers: usize) -> Result<()> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        let start = Instant::now();

        let cache = &self.cache;
        let items = &mut self.items;
        pool.install(|| fill_parallel(cache, 0, items, workers));

        tracing::info!(
            workers,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dataset built"
        );
        Ok(())
    }
}

impl core::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dataset").field("items", &self.items.len()).finish()
    }
}

/// Dataset as seen by a VM: computed on demand (light) or looked up (full).
#[derive(Clone, Debug)]
pub enum DatasetView {
    /// Items are recomputed from the cache on every read.
    Light(Arc<Cache>),
    /// Items are read from the materialized dataset.
    Full(Arc<Dataset>),
}

impl DatasetView {
    /// XORs the item containing byte offset `address` into `line`.
    #[inline]
    pub fn read(&self, address: u64, line: &mut RegisterLine) {
        let index = address / CACHE_LINE_SIZE as u64;
        match self {
            Self::Light(cache) => {
                let item = cache.dataset_item(index);
                xor_line(line, &item);
            }
            Self::Full(dataset) => xor_line(line, dataset.item(index)),
        }
    }

    /// Hint that `address` will be read soon. Portable builds do nothing.
    #[inline]
    pub fn prefetch(&self, _address: u64) {}

    /// True when backed by a materialized dataset.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Splits `lines`, which hold items starting at `first`, into `workers`
/// contiguous chunks. Chunk `i` covers `[i*n/workers, (i+1)*n/workers)`
/// relative to `first` and is paired with its first item number.
fn partition(first: u64, lines: &mut [RegisterLine], workers: usize) -> Vec<(u64, &mut [RegisterLine])> {
    let total = lines.len();
    let mut chunks = Vec::with_capacity(workers);
    let mut rest = lines;
    let mut begin = 0;
    for i in 0..workers {
        let end = (i + 1) * total / workers;
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(end - begin);
        chunks.push((first + begin as u64, head));
        rest = tail;
        begin = end;
    }
    chunks
}

/// Computes `lines` (items starting at `first`) on the current rayon pool,
/// one task per chunk.
fn fill_parallel(cache: &Cache, first: u64, lines: &mut [RegisterLine], workers: usize) {
    partition(first, lines, workers.max(1))
        .into_par_iter()
        .for_each(|(start, chunk)| {
            for (item, line) in (start..).zip(chunk.iter_mut()) {
                *line = cache.dataset_item(item);
            }
        });
}

#[inline]
fn xor_line(line: &mut RegisterLine, item: &RegisterLine) {
    for (r, v) in line.iter_mut().zip(item) {
        *r ^= v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_read_xors_item() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        cache.init(b"test key 000").unwrap();
        let cache = Arc::new(cache);
        let view = DatasetView::Light(cache.clone());

        let item = cache.dataset_item(0);
        assert_eq!(item[0], 0x680588a85ae222db);
        let mut line = [0u64; 8];
        view.read(0, &mut line);
        assert_eq!(line, item);

        // Same item, unaligned address: XOR cancels.
        view.read(17, &mut line);
        assert_eq!(line, [0u64; 8]);
        assert!(!view.is_full());
    }

    #[test]
    fn new_requires_full_mem() {
        let cache = Arc::new(Cache::new(Flags::DEFAULT).unwrap());
        assert!(matches!(
            Dataset::new(Flags::DEFAULT, cache.clone()),
            Err(Error::ModeMismatch("dataset"))
        ));
        assert!(matches!(
            Dataset::new(Flags::FULL_MEM | Flags::LARGE_PAGES, cache),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn partition_covers_range_in_order() {
        let mut lines = vec![[0u64; 8]; 1000];
        let chunks = partition(500, &mut lines, 7);
        assert_eq!(chunks.len(), 7);

        let mut expected = 500;
        for (i, (first, chunk)) in chunks.iter().enumerate() {
            assert_eq!(*first, expected);
            assert_eq!(*first, 500 + (i * 1000 / 7) as u64);
            expected += chunk.len() as u64;
        }
        assert_eq!(expected, 1500);

        // More workers than items: trailing chunks are empty.
        let mut few = vec![[0u64; 8]; 3];
        let lens: Vec<usize> = partition(0, &mut few, 5).iter().map(|(_, c)| c.len()).collect();
        assert_eq!(lens.iter().sum::<usize>(), 3);
        assert_eq!(lens.len(), 5);
    }

    #[test]
    fn parallel_fill_matches_serial() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        cache.init(b"test key 000").unwrap();

        let first = DATASET_ITEM_COUNT - 1000;
        let mut serial = vec![[0u64; 8]; 1000];
        fill_parallel(&cache, first, &mut serial, 1);
        let mut parallel = vec![[0u64; 8]; 1000];
        fill_parallel(&cache, first, &mut parallel, 7);

        assert_eq!(serial, parallel);
        for (item, line) in (first..).zip(&serial) {
            assert_eq!(line, &cache.dataset_item(item));
        }
    }

    #[test]
    #[ignore = "allocates the 2 GiB dataset"]
    fn full_matches_light() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        cache.init(b"test key 000").unwrap();
        let cache = Arc::new(cache);

        let mut dataset = Dataset::new(Flags::FULL_MEM, cache.clone()).unwrap();
        dataset.build(0, 1000);
        let last = dataset.item_count() - 10;
        dataset.build(last, 10);

        for index in (0..1000).chain(last..dataset.item_count()) {
            assert_eq!(dataset.item(index), &cache.dataset_item(index));
        }
    }

    #[test]
    #[ignore = "allocates the 2 GiB dataset"]
    #[should_panic(expected = "exceeds")]
    fn build_out_of_range_panics() {
        let mut cache = Cache::new(Flags::DEFAULT).unwrap();
        cache.init(b"test key 000").unwrap();
        let mut dataset = Dataset::new(Flags::FULL_MEM, Arc::new(cache)).unwrap();
        let total = dataset.item_count();
        dataset.build(total - 1, 2);
    }
}
