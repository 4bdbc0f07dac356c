use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::config::LOG_SUFFIX;
use crate::common::{DbError, Result};

/// Log file layout:
///
/// +--------------------+
/// | x_checksum: i32 LE |  (running checksum over all records)
/// +--------------------+
/// | record             |
/// | record             |
/// | ...                |
/// | bad tail?          |  (partial record from a torn write, dropped on open)
/// +--------------------+
///
/// Each record is `[len: u32 LE][chk: i32 LE][payload: len]` where `chk` is
/// the polynomial checksum of the payload alone, and the file checksum folds
/// the per-record checksums: `x = x * SEED + chk`, in 32-bit wrapping
/// arithmetic. The wrap must be reproduced bit-for-bit to stay
/// file-compatible.
const SEED: i32 = 13331;

/// Offset of the first record.
const OF_RECORDS: u64 = 4;

/// Record header: length + checksum.
const RECORD_HEADER: u64 = 8;

pub fn checksum(mut x: i32, bytes: &[u8]) -> i32 {
    for &b in bytes {
        x = x.wrapping_mul(SEED).wrapping_add(b as i8 as i32);
    }
    x
}

struct WalInner {
    file: File,
    /// Running file checksum, mirrored at offset 0.
    x_checksum: i32,
    /// Logical end of the log (past the last complete record).
    size: u64,
    /// Forward-iteration cursor.
    pos: u64,
}

/// Append-only write-ahead log with per-record and whole-file checksums.
///
/// `append` forces data to disk before returning, which is what makes the
/// write-ahead ordering of the data manager meaningful. Iteration via
/// `rewind`/`next` treats a per-record checksum failure as end-of-file.
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Creates a fresh log at `<path>.log` with a zero file checksum.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(log_path(path.as_ref()))?;
        file.write_all(&0i32.to_le_bytes())?;
        file.sync_data()?;
        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                x_checksum: 0,
                size: OF_RECORDS,
                pos: OF_RECORDS,
            }),
        })
    }

    /// Opens an existing log, verifying the file checksum and truncating any
    /// bad tail left by a torn write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(log_path(path.as_ref()))?;

        let file_len = file.metadata()?.len();
        if file_len < OF_RECORDS {
            return Err(DbError::BadLogFile);
        }
        let mut prefix = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;
        let stored = i32::from_le_bytes(prefix);

        let mut inner = WalInner {
            file,
            x_checksum: 0,
            size: file_len,
            pos: OF_RECORDS,
        };

        // Walk the complete records, accumulating the file checksum.
        let mut x = 0i32;
        while let Some(record) = next_record(&mut inner)? {
            x = x.wrapping_mul(SEED).wrapping_add(checksum(0, &record));
        }
        let good_end = inner.pos;

        if x != stored {
            // A torn tail may have made it into the stored checksum before
            // the record itself fully reached disk; dropping the tail and
            // rewriting the prefix restores write/verify symmetry. With no
            // tail to blame, the log is corrupt.
            if good_end >= file_len {
                return Err(DbError::BadLogFile);
            }
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.write_all(&x.to_le_bytes())?;
        }

        inner.file.set_len(good_end)?;
        inner.file.sync_data()?;
        inner.x_checksum = x;
        inner.size = good_end;
        inner.pos = OF_RECORDS;

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Appends one record and forces it to disk.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        let chk = checksum(0, payload);
        let mut record = Vec::with_capacity(RECORD_HEADER as usize + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&chk.to_le_bytes());
        record.extend_from_slice(payload);

        let mut inner = self.inner.lock();
        let end = inner.size;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&record)?;

        inner.x_checksum = inner.x_checksum.wrapping_mul(SEED).wrapping_add(chk);
        let x = inner.x_checksum;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&x.to_le_bytes())?;
        inner.file.sync_data()?;

        inner.size = end + record.len() as u64;
        Ok(())
    }

    /// Resets the iteration cursor to the first record.
    pub fn rewind(&self) {
        self.inner.lock().pos = OF_RECORDS;
    }

    /// Returns the next record's payload, or None at end-of-file or on a
    /// per-record checksum failure.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        next_record(&mut self.inner.lock())
    }
}

fn next_record(inner: &mut WalInner) -> Result<Option<Vec<u8>>> {
    if inner.pos + RECORD_HEADER > inner.size {
        return Ok(None);
    }
    let mut header = [0u8; RECORD_HEADER as usize];
    inner.file.seek(SeekFrom::Start(inner.pos))?;
    inner.file.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as u64;
    let chk = i32::from_le_bytes(header[4..8].try_into().unwrap());

    if inner.pos + RECORD_HEADER + len > inner.size {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    inner.file.read_exact(&mut payload)?;
    if checksum(0, &payload) != chk {
        return Ok(None);
    }
    inner.pos += RECORD_HEADER + len;
    Ok(Some(payload))
}

fn log_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(LOG_SUFFIX);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        // The polynomial hash must wrap in 32-bit signed arithmetic and
        // treat bytes as signed.
        assert_eq!(checksum(0, &[1, 2]), 13331 + 2);
        assert_eq!(checksum(0, &[0xFF]), -1);
        let big = vec![0x7F; 64];
        let _ = checksum(0, &big);
    }

    #[test]
    fn test_append_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");
        let wal = Wal::create(&path).unwrap();

        wal.append(b"first").unwrap();
        wal.append(b"second").unwrap();

        wal.rewind();
        assert_eq!(wal.next().unwrap().unwrap(), b"first");
        assert_eq!(wal.next().unwrap().unwrap(), b"second");
        assert_eq!(wal.next().unwrap(), None);
    }

    #[test]
    fn test_reopen_verifies_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"alpha").unwrap();
            wal.append(b"beta").unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        wal.rewind();
        assert_eq!(wal.next().unwrap().unwrap(), b"alpha");
        assert_eq!(wal.next().unwrap().unwrap(), b"beta");
        assert_eq!(wal.next().unwrap(), None);
    }

    #[test]
    fn test_bad_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"keep me").unwrap();
            wal.append(b"torn record").unwrap();
        }

        // Rip the last 4 bytes off the final record.
        let file = OpenOptions::new()
            .write(true)
            .open(log_path(&path))
            .unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 4).unwrap();
        drop(file);

        let wal = Wal::open(&path).unwrap();
        wal.rewind();
        assert_eq!(wal.next().unwrap().unwrap(), b"keep me");
        assert_eq!(wal.next().unwrap(), None);

        // The rewritten prefix verifies on a second clean open.
        drop(wal);
        let wal = Wal::open(&path).unwrap();
        wal.rewind();
        assert_eq!(wal.next().unwrap().unwrap(), b"keep me");
        assert_eq!(wal.next().unwrap(), None);
    }

    #[test]
    fn test_corrupt_prefix_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"record").unwrap();
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(log_path(&path))
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        drop(file);

        assert!(matches!(Wal::open(&path), Err(DbError::BadLogFile)));
    }

    #[test]
    fn test_append_after_reopen_continues_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test");
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"one").unwrap();
        }
        {
            let wal = Wal::open(&path).unwrap();
            wal.append(b"two").unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        wal.rewind();
        assert_eq!(wal.next().unwrap().unwrap(), b"one");
        assert_eq!(wal.next().unwrap().unwrap(), b"two");
        assert_eq!(wal.next().unwrap(), None);
    }
}
