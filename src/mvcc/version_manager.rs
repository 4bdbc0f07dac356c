use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{DbError, RefCache, Result, Uid, Xid};
use crate::storage::DataManager;
use crate::txn::TransactionManager;

use super::entry::Entry;
use super::lock_table::LockTable;
use super::transaction::{Fault, IsolationLevel, Transaction};
use super::visibility;

/// VersionManager layers MVCC on top of the data manager: it tracks live
/// transactions and their snapshots, resolves record visibility, and runs
/// write conflicts through the lock table.
///
/// It doubles as a reference-counted cache of Entries keyed by UID, the
/// same way the data manager caches DataItems.
pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    lock_table: LockTable,
    entries: RefCache<Entry>,
    active: Mutex<HashMap<u64, Arc<Transaction>>>,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        Self {
            tm,
            dm,
            lock_table: LockTable::new(),
            entries: RefCache::unbounded(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.tm.begin()?;
        let t = Transaction::new(xid, level, &active);
        active.insert(xid.as_u64(), Arc::new(t));
        Ok(xid)
    }

    /// Reads the record at `uid` as seen by `xid`, or None when no visible
    /// version exists.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        t.check_fault()?;

        let entry = match self.load_entry(uid) {
            Ok(entry) => entry,
            Err(DbError::NullEntry) => return Ok(None),
            Err(e) => return Err(e),
        };
        let result = match visibility::is_visible(&self.tm, &t, &entry) {
            Ok(true) => Ok(Some(entry.data())),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        self.release_entry(&entry)?;
        result
    }

    /// Inserts a record owned by `xid` and returns its UID.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let t = self.transaction(xid)?;
        t.check_fault()?;
        self.dm.insert(xid, &Entry::wrap_raw(t.xid(), data))
    }

    /// Deletes the version at `uid`. Returns false when there is nothing
    /// visible to delete (or `xid` already deleted it); fails with
    /// `ConcurrentUpdate` and auto-aborts on deadlock or version skip.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let t = self.transaction(xid)?;
        t.check_fault()?;

        let entry = match self.load_entry(uid) {
            Ok(entry) => entry,
            Err(DbError::NullEntry) => return Ok(false),
            Err(e) => return Err(e),
        };
        let result = self.delete_entry(&t, &entry, uid);
        self.release_entry(&entry)?;
        result
    }

    /// Commits `xid`: drops it from the live set, releases its locks and
    /// marks it committed. A faulted transaction cannot commit.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let t = self.transaction(xid)?;
        t.check_fault()?;

        self.active.lock().remove(&xid.as_u64());
        self.lock_table.release_all(xid);
        self.tm.commit(xid)
    }

    /// Manually aborts `xid`.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.intern_abort(xid, false)
    }

    /// Drains the entry cache. Called on database shutdown, after which all
    /// pinned DataItems are handed back to the data manager.
    pub fn close(&self) -> Result<()> {
        self.entries.close(|entry| self.dm.release(entry.item()))
    }

    fn delete_entry(&self, t: &Transaction, entry: &Entry, uid: Uid) -> Result<bool> {
        if !visibility::is_visible(&self.tm, t, entry)? {
            return Ok(false);
        }

        match self.lock_table.acquire(t.xid(), uid) {
            Ok(None) => {}
            Ok(Some(gate)) => gate.wait(),
            Err(DbError::Deadlock) => return self.auto_abort(t),
            Err(e) => return Err(e),
        }

        if entry.xmax() == t.xid() {
            return Ok(false);
        }
        if visibility::is_version_skip(&self.tm, t, entry)? {
            return self.auto_abort(t);
        }

        entry.set_xmax(t.xid(), &self.dm)?;
        Ok(true)
    }

    /// Marks the transaction faulted, rolls it back and surfaces
    /// `ConcurrentUpdate`. The transaction stays in the live set until the
    /// caller's own `abort` removes it.
    fn auto_abort(&self, t: &Transaction) -> Result<bool> {
        t.set_fault(Fault::ConcurrentUpdate);
        self.intern_abort(t.xid(), true)?;
        t.set_auto_aborted();
        Err(DbError::ConcurrentUpdate)
    }

    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        let t = {
            let mut active = self.active.lock();
            let t = active
                .get(&xid.as_u64())
                .cloned()
                .ok_or(DbError::TransactionNotFound(xid))?;
            if !auto {
                active.remove(&xid.as_u64());
            }
            t
        };

        if t.is_auto_aborted() {
            return Ok(());
        }
        self.lock_table.release_all(xid);
        self.tm.abort(xid)
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid.as_u64())
            .cloned()
            .ok_or(DbError::TransactionNotFound(xid))
    }

    fn load_entry(&self, uid: Uid) -> Result<Arc<Entry>> {
        self.entries.get(uid.as_u64(), || match self.dm.read(uid)? {
            Some(item) => Ok(Arc::new(Entry::new(uid, item))),
            None => Err(DbError::NullEntry),
        })
    }

    fn release_entry(&self, entry: &Entry) -> Result<()> {
        self.entries
            .release(entry.uid().as_u64(), |entry| self.dm.release(entry.item()))
    }
}
