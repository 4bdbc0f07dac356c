use std::path::Path;
use std::sync::Arc;

use crate::common::{Result, Uid, Xid};
use crate::mvcc::{IsolationLevel, VersionManager};
use crate::storage::DataManager;
use crate::txn::TransactionManager;

/// An embedded database instance.
///
/// Wires the transaction manager, data manager and version manager over a
/// shared storage prefix: `<path>.db`, `<path>.xid` and `<path>.log`.
/// `capacity` is the page-cache size in pages and must be at least 10.
pub struct Db {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Db {
    /// Creates a fresh database at the given path prefix.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let tm = Arc::new(TransactionManager::create(&path)?);
        let dm = Arc::new(DataManager::create(&path, capacity, Arc::clone(&tm))?);
        let vm = VersionManager::new(Arc::clone(&tm), Arc::clone(&dm));
        Ok(Self { tm, dm, vm })
    }

    /// Opens an existing database, recovering from the log if the previous
    /// process crashed.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let tm = Arc::new(TransactionManager::open(&path)?);
        let dm = Arc::new(DataManager::open(&path, capacity, Arc::clone(&tm))?);
        let vm = VersionManager::new(Arc::clone(&tm), Arc::clone(&dm));
        Ok(Self { tm, dm, vm })
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    /// Direct access to persistent transaction state.
    pub fn tm(&self) -> &TransactionManager {
        &self.tm
    }

    /// Clean shutdown: releases cached entries and writes everything back,
    /// stamping the clean-close marker so the next open skips recovery.
    pub fn close(self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()
    }
}
