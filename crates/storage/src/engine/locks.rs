//! Striped per-key write locks
//!
//! Writers lock the stripes of every key they touch, always in ascending
//! stripe order, so batches over overlapping keys cannot deadlock and writes
//! to disjoint stripes proceed in parallel.

use parking_lot::{Mutex, MutexGuard};
use xxhash_rust::xxh3::xxh3_64;

pub(crate) const DEFAULT_STRIPES: usize = 256;

pub(crate) struct LockStripes {
    stripes: Box<[Mutex<()>]>,
}

pub(crate) struct StripeGuards<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockStripes {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    #[inline]
    fn stripe_of(&self, key: &[u8]) -> usize {
        (xxh3_64(key) % self.stripes.len() as u64) as usize
    }

    /// Lock every stripe covering `keys`
    pub fn lock<'k, I>(&self, keys: I) -> StripeGuards<'_>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(|k| self.stripe_of(k)).collect();
        indices.sort_unstable();
        indices.dedup();

        StripeGuards {
            _guards: indices.into_iter().map(|i| self.stripes[i].lock()).collect(),
        }
    }
}
