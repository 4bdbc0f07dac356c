use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::config::XID_SUFFIX;
use crate::common::{DbError, Result, Xid};

/// XID file layout:
///
/// +------------------+
/// | counter: u64 LE  |  (8 bytes, number of XIDs ever allocated)
/// +------------------+
/// | status: u8       |  (one byte per XID, starting at XID 1)
/// | status: u8       |
/// | ...              |
/// +------------------+
const XID_HEADER_LEN: u64 = 8;

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMMITTED: u8 = 1;
const STATUS_ABORTED: u8 = 2;

struct TmInner {
    file: File,
    xid_counter: u64,
}

/// TransactionManager keeps one durable status byte per transaction.
///
/// `begin` writes the new transaction's status byte before bumping the
/// counter in the header, each step individually fsynced, so a crash can
/// never produce a counter that points past the statuses on disk.
pub struct TransactionManager {
    inner: Mutex<TmInner>,
}

impl TransactionManager {
    /// Creates a fresh XID file at `<path>.xid` and returns a manager over it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(xid_path(path.as_ref()))?;
        file.write_all(&0u64.to_le_bytes())?;
        file.sync_data()?;
        Ok(Self {
            inner: Mutex::new(TmInner {
                file,
                xid_counter: 0,
            }),
        })
    }

    /// Opens an existing XID file, validating that the header counter is
    /// consistent with the file length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(xid_path(path.as_ref()))?;

        let len = file.metadata()?.len();
        if len < XID_HEADER_LEN {
            return Err(DbError::BadXidFile);
        }
        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let xid_counter = u64::from_le_bytes(header);
        if XID_HEADER_LEN + xid_counter != len {
            return Err(DbError::BadXidFile);
        }

        Ok(Self {
            inner: Mutex::new(TmInner { file, xid_counter }),
        })
    }

    /// Starts a new transaction and returns its XID.
    pub fn begin(&self) -> Result<Xid> {
        let mut inner = self.inner.lock();
        let xid = Xid::new(inner.xid_counter + 1);
        write_status(&mut inner.file, xid, STATUS_ACTIVE)?;
        inner.xid_counter += 1;
        let counter = inner.xid_counter;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&counter.to_le_bytes())?;
        inner.file.sync_data()?;
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        let mut inner = self.inner.lock();
        write_status(&mut inner.file, xid, STATUS_COMMITTED)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        let mut inner = self.inner.lock();
        write_status(&mut inner.file, xid, STATUS_ABORTED)
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.read_status(xid)? == STATUS_ACTIVE)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(true);
        }
        Ok(self.read_status(xid)? == STATUS_COMMITTED)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.read_status(xid)? == STATUS_ABORTED)
    }

    /// Marks every still-active transaction aborted in one pass. Recovery
    /// uses this to mop up transactions that began before a crash but left
    /// no log records behind.
    pub fn abort_all_active(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let count = inner.xid_counter as usize;
        let mut statuses = vec![0u8; count];
        inner.file.seek(SeekFrom::Start(XID_HEADER_LEN))?;
        inner.file.read_exact(&mut statuses)?;

        if statuses.iter().any(|&s| s == STATUS_ACTIVE) {
            for status in statuses.iter_mut() {
                if *status == STATUS_ACTIVE {
                    *status = STATUS_ABORTED;
                }
            }
            inner.file.seek(SeekFrom::Start(XID_HEADER_LEN))?;
            inner.file.write_all(&statuses)?;
            inner.file.sync_data()?;
        }
        Ok(())
    }

    fn read_status(&self, xid: Xid) -> Result<u8> {
        let mut inner = self.inner.lock();
        let mut status = [0u8; 1];
        inner.file.seek(SeekFrom::Start(status_offset(xid)))?;
        inner.file.read_exact(&mut status)?;
        Ok(status[0])
    }
}

fn xid_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(XID_SUFFIX);
    PathBuf::from(s)
}

fn status_offset(xid: Xid) -> u64 {
    XID_HEADER_LEN + (xid.as_u64() - 1)
}

fn write_status(file: &mut File, xid: Xid, status: u8) -> Result<()> {
    file.seek(SeekFrom::Start(status_offset(xid)))?;
    file.write_all(&[status])?;
    file.sync_data()?;
    Ok(())
}
