use parking_lot::Mutex;

use crate::common::{PageId, PAGE_SIZE};

/// Number of buckets the page space is divided into.
const INTERVALS: usize = 40;

/// Bucket granularity in bytes.
const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpace {
    pub page_id: PageId,
    pub free: usize,
}

/// In-memory index of per-page free space, bucketed by `PAGE_SIZE / 40`.
///
/// `select` removes the chosen page from the index, so a page is never
/// handed to two concurrent inserters; the caller re-adds it with its new
/// free space once done.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<Vec<PageSpace>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); INTERVALS + 1]),
        }
    }

    pub fn add(&self, page_id: PageId, free: usize) {
        let mut buckets = self.buckets.lock();
        buckets[free / THRESHOLD].push(PageSpace { page_id, free });
    }

    /// Takes a page with at least `need` free bytes out of the index, or
    /// None when no bucket can satisfy the request.
    pub fn select(&self, need: usize) -> Option<PageSpace> {
        let mut buckets = self.buckets.lock();
        let mut number = need / THRESHOLD;
        if number < INTERVALS {
            number += 1;
        }
        while number <= INTERVALS {
            if buckets[number].is_empty() {
                number += 1;
                continue;
            }
            return Some(buckets[number].remove(0));
        }
        None
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_empty() {
        let index = FreeSpaceIndex::new();
        assert_eq!(index.select(100), None);
    }

    #[test]
    fn test_select_removes_entry() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(2), 4000);

        let hit = index.select(100).unwrap();
        assert_eq!(hit.page_id, PageId::new(2));
        assert_eq!(hit.free, 4000);

        // Gone until re-added.
        assert_eq!(index.select(100), None);
        index.add(hit.page_id, 3000);
        assert!(index.select(100).is_some());
    }

    #[test]
    fn test_select_rounds_up_a_bucket() {
        let index = FreeSpaceIndex::new();
        // A page whose free space lands in the same bucket as the request
        // is skipped; only a strictly higher bucket satisfies it.
        index.add(PageId::new(2), THRESHOLD + THRESHOLD / 2);
        assert_eq!(index.select(THRESHOLD + THRESHOLD / 2), None);
        assert!(index.select(THRESHOLD - 1).is_some());
    }

    #[test]
    fn test_select_prefers_smallest_fitting_bucket() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(5), PAGE_SIZE - 2);
        index.add(PageId::new(3), 10 * THRESHOLD);

        let hit = index.select(5 * THRESHOLD).unwrap();
        assert_eq!(hit.page_id, PageId::new(3));
    }
}
