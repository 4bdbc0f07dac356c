use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::config::DB_SUFFIX;
use crate::common::{DbError, PageId, RefCache, Result, MIN_CACHE_CAPACITY, PAGE_SIZE};

use super::page::{zeroed, Page};

/// PageCache is a fixed-capacity, reference-counted cache of pages backed by
/// the single data file.
///
/// `get_page` pins a page; `release` unpins it, and a dirty page is written
/// back the moment its last reference goes away. There is no replacement
/// policy: when every slot is pinned or loading, `get_page` for an absent
/// key fails with `CacheFull`.
///
/// The cache map and the file are guarded separately so that blocking file
/// I/O never happens under the map lock.
pub struct PageCache {
    cache: RefCache<Page>,
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl PageCache {
    /// Creates a fresh data file at `<path>.db`.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        if capacity < MIN_CACHE_CAPACITY {
            return Err(DbError::MemTooSmall { got: capacity });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(db_path(path.as_ref()))?;
        Ok(Self {
            cache: RefCache::with_capacity(capacity),
            file: Mutex::new(file),
            page_count: AtomicU32::new(0),
        })
    }

    /// Opens an existing data file at `<path>.db`.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        if capacity < MIN_CACHE_CAPACITY {
            return Err(DbError::MemTooSmall { got: capacity });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(db_path(path.as_ref()))?;
        let len = file.metadata()?.len();
        Ok(Self {
            cache: RefCache::with_capacity(capacity),
            file: Mutex::new(file),
            page_count: AtomicU32::new((len / PAGE_SIZE as u64) as u32),
        })
    }

    /// Number of pages in the data file.
    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Fetches a page, pinning it until `release`.
    pub fn get_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.get(page_id.as_u32() as u64, || {
            let mut data = zeroed();
            self.read_page_bytes(page_id, &mut data[..])?;
            Ok(Arc::new(Page::new(page_id, data)))
        })
    }

    /// Unpins a page. At pin count zero a dirty page is written back and the
    /// slot is freed.
    pub fn release(&self, page: &Arc<Page>) -> Result<()> {
        self.cache.release(page.page_id().as_u32() as u64, |page| {
            if page.is_dirty() {
                self.flush_page(&page)?;
            }
            Ok(())
        })
    }

    /// Appends a new page holding `init` to the data file and returns its
    /// number. The page is flushed immediately and is not cached.
    pub fn new_page(&self, init: Box<[u8; PAGE_SIZE]>) -> Result<PageId> {
        let page_id = PageId::new(self.page_count.fetch_add(1, Ordering::AcqRel) + 1);
        let page = Page::new(page_id, init);
        self.flush_page(&page)?;
        Ok(page_id)
    }

    /// Writes a page's current bytes to the data file and clears its dirty
    /// flag.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        page.copy_to(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page.page_id().file_offset()))?;
        file.write_all(&buf)?;
        file.sync_data()?;
        page.set_dirty(false);
        Ok(())
    }

    /// Forces the data file to exactly `max_page` pages, growing or
    /// shrinking as needed. Used by recovery.
    pub fn truncate_to(&self, max_page: PageId) -> Result<()> {
        let len = max_page.as_u32() as u64 * PAGE_SIZE as u64;
        self.file.lock().set_len(len)?;
        self.page_count.store(max_page.as_u32(), Ordering::Release);
        Ok(())
    }

    /// Writes back every cached page and drops the cache.
    pub fn close(&self) -> Result<()> {
        self.cache.close(|page| {
            if page.is_dirty() {
                self.flush_page(&page)?;
            }
            Ok(())
        })
    }

    fn read_page_bytes(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf[read..].fill(0);
        Ok(())
    }
}

fn db_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(DB_SUFFIX);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_cache(capacity: usize) -> (PageCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pc = PageCache::create(dir.path().join("test"), capacity).unwrap();
        (pc, dir)
    }

    #[test]
    fn test_capacity_minimum() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PageCache::create(dir.path().join("small"), 9),
            Err(DbError::MemTooSmall { got: 9 })
        ));
    }

    #[test]
    fn test_new_page_grows_file() {
        let (pc, _dir) = create_cache(10);
        assert_eq!(pc.page_count(), 0);

        let p1 = pc.new_page(zeroed()).unwrap();
        let p2 = pc.new_page(zeroed()).unwrap();
        assert_eq!(p1, PageId::new(1));
        assert_eq!(p2, PageId::new(2));
        assert_eq!(pc.page_count(), 2);
    }

    #[test]
    fn test_dirty_page_written_back_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");

        {
            let pc = PageCache::create(&path, 10).unwrap();
            let pgno = pc.new_page(zeroed()).unwrap();
            let page = pc.get_page(pgno).unwrap();
            page.write_data()[0] = 0xAB;
            page.set_dirty(true);
            pc.release(&page).unwrap();
        }

        let pc = PageCache::open(&path, 10).unwrap();
        let page = pc.get_page(PageId::new(1)).unwrap();
        assert_eq!(page.read_data()[0], 0xAB);
        pc.release(&page).unwrap();
    }

    #[test]
    fn test_cache_full() {
        let (pc, _dir) = create_cache(10);
        for _ in 0..11 {
            pc.new_page(zeroed()).unwrap();
        }

        let pinned: Vec<_> = (1..=10)
            .map(|i| pc.get_page(PageId::new(i)).unwrap())
            .collect();
        assert!(matches!(
            pc.get_page(PageId::new(11)),
            Err(DbError::CacheFull)
        ));

        pc.release(&pinned[0]).unwrap();
        let page = pc.get_page(PageId::new(11)).unwrap();
        pc.release(&page).unwrap();
        for p in &pinned[1..] {
            pc.release(p).unwrap();
        }
    }

    #[test]
    fn test_truncate_to_grows_and_shrinks() {
        let (pc, _dir) = create_cache(10);
        pc.new_page(zeroed()).unwrap();

        pc.truncate_to(PageId::new(5)).unwrap();
        assert_eq!(pc.page_count(), 5);

        // Pages past the old end read back zeroed.
        let page = pc.get_page(PageId::new(4)).unwrap();
        assert!(page.read_data().iter().all(|&b| b == 0));
        pc.release(&page).unwrap();

        pc.truncate_to(PageId::new(1)).unwrap();
        assert_eq!(pc.page_count(), 1);
    }
}
