use rand::Rng;

use crate::common::PAGE_SIZE;

use super::page::{zeroed, Page};

/// Page 1 carries only the clean-shutdown marker. A random 8-byte nonce is
/// written at [100, 108) every time the database opens; a clean close copies
/// it to [108, 116). If the two regions differ at open time the previous
/// process died without closing and recovery must run.
const OF_MARKER: usize = 100;
const MARKER_LEN: usize = 8;

/// Raw bytes for a fresh metadata page with the open nonce already set.
pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = zeroed();
    stamp_open(&mut raw[..]);
    raw
}

/// Stamps a new open nonce onto the page at startup.
pub fn set_open(page: &Page) {
    page.set_dirty(true);
    stamp_open(&mut page.write_data()[..]);
}

/// Copies the open nonce into the close slot at clean shutdown.
pub fn set_close(page: &Page) {
    page.set_dirty(true);
    let mut data = page.write_data();
    let (open, close) = data[OF_MARKER..OF_MARKER + 2 * MARKER_LEN].split_at_mut(MARKER_LEN);
    close.copy_from_slice(open);
}

/// True if the previous shutdown was clean.
pub fn check(page: &Page) -> bool {
    let data = page.read_data();
    data[OF_MARKER..OF_MARKER + MARKER_LEN]
        == data[OF_MARKER + MARKER_LEN..OF_MARKER + 2 * MARKER_LEN]
}

fn stamp_open(raw: &mut [u8]) {
    let nonce: [u8; MARKER_LEN] = rand::thread_rng().gen();
    raw[OF_MARKER..OF_MARKER + MARKER_LEN].copy_from_slice(&nonce);
}
