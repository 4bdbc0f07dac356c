use std::collections::HashMap;

use tracing::info;

use crate::common::{DbError, PageId, Result, Uid, Xid};
use crate::txn::TransactionManager;

use super::data_item;
use super::data_page;
use super::page_cache::PageCache;
use super::wal::Wal;

/// WAL record payloads.
///
/// Insert: `[type=0][xid: u64][pgno: u32][offset: u16][raw]` where `raw` is
/// the complete slot image and `offset` is the page FSO before the splice.
///
/// Update: `[type=1][xid: u64][uid: u64][old][new]` where the old and new
/// slot images have equal length, recoverable from the record size.
const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        uid: Uid,
        old: Vec<u8>,
        new: Vec<u8>,
    },
}

impl LogRecord {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => {
                let mut out = Vec::with_capacity(15 + raw.len());
                out.push(TYPE_INSERT);
                out.extend_from_slice(&xid.as_u64().to_le_bytes());
                out.extend_from_slice(&page_id.as_u32().to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(raw);
                out
            }
            LogRecord::Update { xid, uid, old, new } => {
                let mut out = Vec::with_capacity(17 + old.len() + new.len());
                out.push(TYPE_UPDATE);
                out.extend_from_slice(&xid.as_u64().to_le_bytes());
                out.extend_from_slice(&uid.as_u64().to_le_bytes());
                out.extend_from_slice(old);
                out.extend_from_slice(new);
                out
            }
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 9 {
            return Err(DbError::BadLogFile);
        }
        let xid = Xid::new(u64::from_le_bytes(bytes[1..9].try_into().unwrap()));
        match bytes[0] {
            TYPE_INSERT => {
                if bytes.len() < 15 {
                    return Err(DbError::BadLogFile);
                }
                let page_id = PageId::new(u32::from_le_bytes(bytes[9..13].try_into().unwrap()));
                let offset = u16::from_le_bytes(bytes[13..15].try_into().unwrap());
                Ok(LogRecord::Insert {
                    xid,
                    page_id,
                    offset,
                    raw: bytes[15..].to_vec(),
                })
            }
            TYPE_UPDATE => {
                if bytes.len() < 17 || (bytes.len() - 17) % 2 != 0 {
                    return Err(DbError::BadLogFile);
                }
                let uid = Uid::from_u64(u64::from_le_bytes(bytes[9..17].try_into().unwrap()));
                let half = (bytes.len() - 17) / 2;
                Ok(LogRecord::Update {
                    xid,
                    uid,
                    old: bytes[17..17 + half].to_vec(),
                    new: bytes[17 + half..].to_vec(),
                })
            }
            _ => Err(DbError::BadLogFile),
        }
    }

    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert { page_id, .. } => *page_id,
            LogRecord::Update { uid, .. } => uid.page_id(),
        }
    }
}

/// Replays the log against the page cache after a crash.
///
/// Redo re-applies every record of a finished transaction; undo walks each
/// still-active transaction's records backwards, invalidating its inserts
/// and restoring pre-images of its updates, then marks it aborted. After
/// this returns no active XIDs remain.
pub fn recover(tm: &TransactionManager, wal: &Wal, cache: &PageCache) -> Result<()> {
    info!("recovering after unclean shutdown");

    let mut max_page = 1u32;
    wal.rewind();
    while let Some(payload) = wal.next()? {
        let record = LogRecord::parse(&payload)?;
        max_page = max_page.max(record.page_id().as_u32());
    }
    cache.truncate_to(PageId::new(max_page))?;
    info!(pages = max_page, "data file truncated");

    redo(tm, wal, cache)?;
    undo(tm, wal, cache)?;

    // Transactions that began but logged nothing before the crash still
    // read as active; no active XIDs may survive recovery.
    tm.abort_all_active()?;

    info!("recovery complete");
    Ok(())
}

fn redo(tm: &TransactionManager, wal: &Wal, cache: &PageCache) -> Result<()> {
    wal.rewind();
    while let Some(payload) = wal.next()? {
        let record = LogRecord::parse(&payload)?;
        if tm.is_active(record.xid())? {
            continue;
        }
        match record {
            LogRecord::Insert {
                page_id,
                offset,
                raw,
                ..
            } => {
                let page = cache.get_page(page_id)?;
                data_page::recover_insert(&page, &raw, offset);
                cache.release(&page)?;
            }
            LogRecord::Update { uid, new, .. } => {
                let page = cache.get_page(uid.page_id())?;
                data_page::recover_update(&page, &new, uid.offset());
                cache.release(&page)?;
            }
        }
    }
    Ok(())
}

fn undo(tm: &TransactionManager, wal: &Wal, cache: &PageCache) -> Result<()> {
    let mut pending: HashMap<u64, Vec<LogRecord>> = HashMap::new();
    wal.rewind();
    while let Some(payload) = wal.next()? {
        let record = LogRecord::parse(&payload)?;
        if tm.is_active(record.xid())? {
            pending
                .entry(record.xid().as_u64())
                .or_default()
                .push(record);
        }
    }

    for (xid, records) in pending {
        for record in records.iter().rev() {
            match record {
                LogRecord::Insert {
                    page_id,
                    offset,
                    raw,
                    ..
                } => {
                    let mut raw = raw.clone();
                    data_item::set_raw_invalid(&mut raw);
                    let page = cache.get_page(*page_id)?;
                    data_page::recover_insert(&page, &raw, *offset);
                    cache.release(&page)?;
                }
                LogRecord::Update { uid, old, .. } => {
                    let page = cache.get_page(uid.page_id())?;
                    data_page::recover_update(&page, old, uid.offset());
                    cache.release(&page)?;
                }
            }
        }
        tm.abort(Xid::new(xid))?;
        info!(xid, records = records.len(), "rolled back in-flight transaction");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_record_round_trip() {
        let record = LogRecord::Insert {
            xid: Xid::new(3),
            page_id: PageId::new(7),
            offset: 130,
            raw: vec![0, 5, 0, 1, 2, 3, 4, 5],
        };
        assert_eq!(LogRecord::parse(&record.encode()).unwrap(), record);
    }

    #[test]
    fn test_update_record_round_trip() {
        let record = LogRecord::Update {
            xid: Xid::new(9),
            uid: Uid::new(PageId::new(2), 44),
            old: vec![1, 2, 3],
            new: vec![4, 5, 6],
        };
        let parsed = LogRecord::parse(&record.encode()).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.page_id(), PageId::new(2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LogRecord::parse(&[]).is_err());
        assert!(LogRecord::parse(&[9, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        // Update with odd image remainder.
        let mut bytes = vec![TYPE_UPDATE];
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.push(1);
        assert!(LogRecord::parse(&bytes).is_err());
    }
}
