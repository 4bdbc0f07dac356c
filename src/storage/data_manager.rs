use std::path::Path;
use std::sync::Arc;

use crate::common::{DbError, Result, Uid, Xid, RefCache};
use crate::txn::TransactionManager;

use super::data_item::{self, DataItem, ItemUpdate};
use super::data_page;
use super::free_space::FreeSpaceIndex;
use super::meta_page;
use super::page::Page;
use super::page_cache::PageCache;
use super::recovery::{self, LogRecord};
use super::wal::Wal;

/// How many times `insert` asks the free-space index before giving up,
/// allocating a fresh page after each miss.
const INSERT_RETRIES: usize = 5;

/// DataManager is the storage layer's front door: it owns the page cache,
/// the WAL, the free-space index and a reference-counted cache of
/// DataItems keyed by UID.
///
/// Every mutation is logged before it can reach the data file: `insert`
/// appends its WAL record before splicing the page, and the update protocol
/// appends its record while the slot lock is still held. Pages only reach
/// disk on eviction or close, strictly after the forced WAL append.
pub struct DataManager {
    tm: Arc<TransactionManager>,
    cache: PageCache,
    wal: Wal,
    free_index: FreeSpaceIndex,
    items: RefCache<DataItem>,
    meta_page: Arc<Page>,
}

impl DataManager {
    /// Creates a fresh database at `<path>.db` / `<path>.log`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        tm: Arc<TransactionManager>,
    ) -> Result<Self> {
        let cache = PageCache::create(&path, capacity)?;
        let wal = Wal::create(&path)?;

        let pgno = cache.new_page(meta_page::init_raw())?;
        assert_eq!(pgno.as_u32(), 1);
        let meta = cache.get_page(pgno)?;
        cache.flush_page(&meta)?;

        Ok(Self {
            tm,
            cache,
            wal,
            free_index: FreeSpaceIndex::new(),
            items: RefCache::unbounded(),
            meta_page: meta,
        })
    }

    /// Opens an existing database, running crash recovery if the previous
    /// process did not shut down cleanly.
    pub fn open<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        tm: Arc<TransactionManager>,
    ) -> Result<Self> {
        let cache = PageCache::open(&path, capacity)?;
        let wal = Wal::open(&path)?;

        let meta = cache.get_page(crate::common::PageId::new(1))?;
        if !meta_page::check(&meta) {
            recovery::recover(&tm, &wal, &cache)?;
        }

        let dm = Self {
            tm,
            cache,
            wal,
            free_index: FreeSpaceIndex::new(),
            items: RefCache::unbounded(),
            meta_page: meta,
        };
        dm.fill_free_index()?;

        meta_page::set_open(&dm.meta_page);
        dm.cache.flush_page(&dm.meta_page)?;
        Ok(dm)
    }

    pub fn tm(&self) -> &TransactionManager {
        &self.tm
    }

    /// Fetches the DataItem at `uid`, or None if its slot has been
    /// invalidated.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid.as_u64(), || {
            let page = self.cache.get_page(uid.page_id())?;
            Ok(Arc::new(DataItem::parse(page, uid.offset(), uid)))
        })?;
        if !item.is_valid() {
            self.release(&item)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Wraps `data` into a slot, logs it, splices it into a page with
    /// enough room and returns the new record's UID.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        if data.len() > data_item::MAX_ITEM_PAYLOAD {
            return Err(DbError::DataTooLarge {
                size: data.len(),
                max: data_item::MAX_ITEM_PAYLOAD,
            });
        }
        let raw = data_item::wrap_raw(data);

        let mut selected = None;
        for _ in 0..INSERT_RETRIES {
            if let Some(ps) = self.free_index.select(raw.len()) {
                selected = Some(ps);
                break;
            }
            let pgno = self.cache.new_page(data_page::init_raw())?;
            self.free_index.add(pgno, data_page::MAX_FREE_SPACE);
        }
        let ps = selected.ok_or(DbError::DatabaseBusy)?;

        let page = match self.cache.get_page(ps.page_id) {
            Ok(page) => page,
            Err(e) => {
                self.free_index.add(ps.page_id, ps.free);
                return Err(e);
            }
        };

        let spliced = self.log_and_splice(xid, &page, &raw);
        let free = data_page::free_space(&page);
        self.cache.release(&page)?;
        self.free_index.add(ps.page_id, free);

        Ok(Uid::new(ps.page_id, spliced?))
    }

    /// Appends the update WAL record for a finished mutation, then releases
    /// the slot write lock by consuming the update.
    pub fn finish_update(&self, xid: Xid, update: ItemUpdate<'_>) -> Result<()> {
        let record = LogRecord::Update {
            xid,
            uid: update.uid(),
            old: update.before_image().to_vec(),
            new: update.current_image(),
        };
        self.wal.append(&record.encode())?;
        Ok(())
    }

    /// Drops one reference to a cached DataItem; at zero its page goes back
    /// to the page cache.
    pub fn release(&self, item: &Arc<DataItem>) -> Result<()> {
        self.items
            .release(item.uid().as_u64(), |item| self.cache.release(item.page()))
    }

    /// Clean shutdown: drains the item cache, stamps the clean-close marker
    /// on page 1 and writes back every cached page.
    pub fn close(&self) -> Result<()> {
        self.items
            .close(|item| self.cache.release(item.page()))?;

        meta_page::set_close(&self.meta_page);
        self.cache.release(&self.meta_page)?;
        self.cache.close()
    }

    fn log_and_splice(&self, xid: Xid, page: &Arc<Page>, raw: &[u8]) -> Result<u16> {
        let record = LogRecord::Insert {
            xid,
            page_id: page.page_id(),
            offset: data_page::fso(page),
            raw: raw.to_vec(),
        };
        self.wal.append(&record.encode())?;
        Ok(data_page::insert(page, raw))
    }

    fn fill_free_index(&self) -> Result<()> {
        for pgno in 2..=self.cache.page_count() {
            let page = self.cache.get_page(crate::common::PageId::new(pgno))?;
            let free = data_page::free_space(&page);
            self.cache.release(&page)?;
            self.free_index.add(page.page_id(), free);
        }
        Ok(())
    }
}
