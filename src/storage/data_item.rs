use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::{Uid, PAGE_SIZE};

use super::page::Page;

/// On-page slot layout:
///
/// +------------+-------------+----------------+
/// | valid: u8  | size: u16 LE | payload: size |
/// +------------+-------------+----------------+
///
/// A slot is removed only by flipping the valid byte; the bytes stay where
/// they are. 0 means valid, anything else invalid.
const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
const OF_PAYLOAD: usize = 3;

/// Bytes of slot header around each payload.
pub const ITEM_HEADER: usize = OF_PAYLOAD;

/// Largest payload that still fits a wrapped slot into one data page.
pub const MAX_ITEM_PAYLOAD: usize = PAGE_SIZE - 2 - ITEM_HEADER;

/// Wraps payload bytes into slot form.
pub fn wrap_raw(payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(ITEM_HEADER + payload.len());
    raw.push(0);
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// Clears the valid flag on raw slot bytes (logical delete, used by undo).
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = 1;
}

/// A versioned slot within a page.
///
/// The slot lock serializes readers and writers of this one slot; the page
/// lock underneath is only ever taken for the duration of a single copy.
/// Mutation goes through the `begin_update` protocol, which snapshots a
/// before-image so the change can be logged (or cancelled) afterwards.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    offset: usize,
    payload_len: usize,
    slot_lock: RwLock<()>,
}

impl DataItem {
    /// Parses the slot starting at `offset` on `page`.
    pub fn parse(page: Arc<Page>, offset: u16, uid: Uid) -> Self {
        let offset = offset as usize;
        let payload_len = {
            let data = page.read_data();
            u16::from_le_bytes([data[offset + OF_SIZE], data[offset + OF_SIZE + 1]]) as usize
        };
        Self {
            uid,
            page,
            offset,
            payload_len,
            slot_lock: RwLock::new(()),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn is_valid(&self) -> bool {
        self.page.read_data()[self.offset + OF_VALID] == 0
    }

    /// Runs `f` over the payload bytes under the slot read lock.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _r = self.slot_lock.read();
        let data = self.page.read_data();
        f(&data[self.payload_range()])
    }

    /// Starts a mutation: takes the slot write lock, marks the page dirty
    /// and snapshots the slot for the before-image.
    pub fn begin_update(&self) -> ItemUpdate<'_> {
        let guard = self.slot_lock.write();
        self.page.set_dirty(true);
        let before = self.page.read_data()[self.slot_range()].to_vec();
        ItemUpdate {
            item: self,
            _guard: guard,
            before,
        }
    }

    fn slot_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + ITEM_HEADER + self.payload_len
    }

    fn payload_range(&self) -> std::ops::Range<usize> {
        self.offset + OF_PAYLOAD..self.offset + OF_PAYLOAD + self.payload_len
    }
}

/// An in-flight mutation of one DataItem. Holds the slot write lock for its
/// whole lifetime; the data manager consumes it to write the WAL record, or
/// `cancel` rolls the slot back to the before-image.
pub struct ItemUpdate<'a> {
    item: &'a DataItem,
    _guard: RwLockWriteGuard<'a, ()>,
    before: Vec<u8>,
}

impl ItemUpdate<'_> {
    /// Mutates the payload in place.
    pub fn mutate(&mut self, f: impl FnOnce(&mut [u8])) {
        let mut data = self.item.page.write_data();
        f(&mut data[self.item.payload_range()]);
    }

    /// The slot bytes as they were when the update began.
    pub fn before_image(&self) -> &[u8] {
        &self.before
    }

    /// The slot bytes as they are now.
    pub fn current_image(&self) -> Vec<u8> {
        self.item.page.read_data()[self.item.slot_range()].to_vec()
    }

    pub fn uid(&self) -> Uid {
        self.item.uid
    }

    /// Restores the before-image and releases the slot.
    pub fn cancel(self) {
        let mut data = self.item.page.write_data();
        let range = self.item.slot_range();
        data[range].copy_from_slice(&self.before);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;
    use crate::storage::data_page;

    fn item_on_page(payload: &[u8]) -> Arc<DataItem> {
        let page = Arc::new(Page::new(PageId::new(2), data_page::init_raw()));
        let raw = wrap_raw(payload);
        let offset = data_page::insert(&page, &raw);
        let uid = Uid::new(page.page_id(), offset);
        Arc::new(DataItem::parse(page, offset, uid))
    }

    #[test]
    fn test_wrap_and_parse() {
        let item = item_on_page(b"payload");
        assert!(item.is_valid());
        assert_eq!(item.uid().offset(), 2);
        item.with_payload(|p| assert_eq!(p, b"payload"));
    }

    #[test]
    fn test_invalid_flag() {
        let mut raw = wrap_raw(b"x");
        set_raw_invalid(&mut raw);
        assert_eq!(raw[0], 1);
    }

    #[test]
    fn test_update_and_before_image() {
        let item = item_on_page(b"aaaa");
        let mut update = item.begin_update();
        update.mutate(|p| p.copy_from_slice(b"bbbb"));

        assert_eq!(&update.before_image()[ITEM_HEADER..], b"aaaa");
        assert_eq!(&update.current_image()[ITEM_HEADER..], b"bbbb");
        drop(update);

        item.with_payload(|p| assert_eq!(p, b"bbbb"));
        assert!(item.page().is_dirty());
    }

    #[test]
    fn test_cancel_restores_payload() {
        let item = item_on_page(b"orig");
        let mut update = item.begin_update();
        update.mutate(|p| p.copy_from_slice(b"temp"));
        update.cancel();

        item.with_payload(|p| assert_eq!(p, b"orig"));
    }
}
