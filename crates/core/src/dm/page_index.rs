//! Free-space index over regular pages.
//!
//! A flat array of 41 buckets; bucket `k` holds descriptors of pages whose
//! free bytes fall in `[k * THRESHOLD, (k + 1) * THRESHOLD)`. Coarse
//! bucketing keeps inserts from scanning every page while guaranteeing that
//! any descriptor handed out by [`PageIndex::select`] has at least the
//! requested space. A selected page is owned exclusively by the caller
//! until it re-adds the descriptor with the page's updated free space.

use parking_lot::Mutex;

use crate::{Pgno, PAGE_SIZE};

const BUCKETS: usize = 41;
pub(crate) const THRESHOLD: usize = PAGE_SIZE / (BUCKETS - 1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PageSpace {
    pub pgno: Pgno,
    pub free: usize,
}

pub(crate) struct PageIndex {
    buckets: Mutex<[Vec<PageSpace>; BUCKETS]>,
}

impl PageIndex {
    pub fn new() -> Self {
        PageIndex {
            buckets: Mutex::new(std::array::from_fn(|_| Vec::new())),
        }
    }

    pub fn add(&self, pgno: Pgno, free: usize) {
        let bucket = (free / THRESHOLD).min(BUCKETS - 1);
        self.buckets.lock()[bucket].push(PageSpace { pgno, free });
    }

    /// Pops the first descriptor with at least `need` free bytes, scanning
    /// buckets from `need / THRESHOLD` upward. Only the boundary bucket can
    /// contain descriptors below `need`; those are skipped.
    pub fn select(&self, need: usize) -> Option<PageSpace> {
        let mut buckets = self.buckets.lock();
        for bucket in &mut buckets[(need / THRESHOLD).min(BUCKETS - 1)..] {
            if let Some(at) = bucket.iter().position(|ps| ps.free >= need) {
                return Some(bucket.remove(at));
            }
        }
        None
    }
}
