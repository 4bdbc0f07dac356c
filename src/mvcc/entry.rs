use std::sync::Arc;

use crate::common::{Result, Uid, Xid};
use crate::storage::{DataItem, DataManager};

/// MVCC envelope stored in a DataItem's payload:
///
/// +--------------+--------------+----------------+
/// | xmin: u64 LE | xmax: u64 LE | record bytes   |
/// +--------------+--------------+----------------+
///
/// `xmin` is the creating transaction and never changes; `xmax` starts at 0
/// and is overwritten in place by the deleting transaction, under the slot
/// write lock and with a WAL record.
const OF_XMIN: usize = 0;
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

/// Bytes of MVCC header in front of each record.
pub const ENTRY_HEADER: usize = OF_DATA;

/// A versioned record handed out by the version manager. Holds a pinned
/// reference to its backing DataItem.
pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(uid: Uid, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    /// Wraps record bytes into entry form for a fresh insert by `xid`.
    pub fn wrap_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(ENTRY_HEADER + data.len());
        raw.extend_from_slice(&xid.as_u64().to_le_bytes());
        raw.extend_from_slice(&0u64.to_le_bytes());
        raw.extend_from_slice(data);
        raw
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn item(&self) -> &Arc<DataItem> {
        &self.item
    }

    pub fn xmin(&self) -> Xid {
        self.item.with_payload(|p| {
            Xid::new(u64::from_le_bytes(
                p[OF_XMIN..OF_XMAX].try_into().unwrap(),
            ))
        })
    }

    pub fn xmax(&self) -> Xid {
        self.item.with_payload(|p| {
            Xid::new(u64::from_le_bytes(p[OF_XMAX..OF_DATA].try_into().unwrap()))
        })
    }

    /// Returns an owned copy of the record bytes.
    pub fn data(&self) -> Vec<u8> {
        self.item.with_payload(|p| p[OF_DATA..].to_vec())
    }

    /// Stamps `xid` as the deleter of this version, through the logged
    /// update protocol.
    pub fn set_xmax(&self, xid: Xid, dm: &DataManager) -> Result<()> {
        let mut update = self.item.begin_update();
        update.mutate(|p| {
            p[OF_XMAX..OF_DATA].copy_from_slice(&xid.as_u64().to_le_bytes());
        });
        dm.finish_update(xid, update)
    }
}
