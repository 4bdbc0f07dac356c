use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::common::{PageId, PAGE_SIZE};

/// An in-memory copy of one on-disk page.
///
/// Pages are owned by the page cache and handed out behind `Arc`. The raw
/// bytes sit behind a `RwLock`; the dirty flag records whether the copy has
/// diverged from disk and must be written back when the cache drops it.
pub struct Page {
    page_id: PageId,
    dirty: AtomicBool,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    pub fn new(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            page_id,
            dirty: AtomicBool::new(false),
            data: RwLock::new(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Returns a read guard over the page bytes.
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Returns a write guard over the page bytes.
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies the page bytes into the given buffer.
    pub fn copy_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), PAGE_SIZE);
        out.copy_from_slice(&self.data.read()[..]);
    }
}

/// Allocates a zeroed page-sized buffer.
pub fn zeroed() -> Box<[u8; PAGE_SIZE]> {
    vec![0u8; PAGE_SIZE].into_boxed_slice().try_into().unwrap()
}
