use crate::common::Result;
use crate::txn::TransactionManager;

use super::entry::Entry;
use super::transaction::{IsolationLevel, Transaction};

/// Whether `entry`'s version is visible to transaction `t`.
pub fn is_visible(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => read_committed(tm, t, entry),
        IsolationLevel::RepeatableRead => repeatable_read(tm, t, entry),
    }
}

/// Whether a pending write by `t` would skip over a version: some
/// transaction invisible to `t` has already deleted (and committed the
/// deletion of) this version. Only repeatable-read refuses to write past
/// such a version; read-committed just takes the latest state.
pub fn is_version_skip(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    if t.level() == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xmax = entry.xmax();
    Ok(tm.is_committed(xmax)? && (xmax > t.xid() || t.in_snapshot(xmax)))
}

/// A version is visible under read-committed when it was created by this
/// transaction and not deleted, or created by any committed transaction and
/// not deleted by a committed one.
fn read_committed(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = t.xid();
    let xmin = entry.xmin();
    let xmax = entry.xmax();

    if xmin == xid && xmax.as_u64() == 0 {
        return Ok(true);
    }
    if tm.is_committed(xmin)? {
        if xmax.as_u64() == 0 {
            return Ok(true);
        }
        if xmax != xid && !tm.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Under repeatable-read the creator must additionally have committed
/// before this transaction began (lower XID, not in the snapshot), and a
/// deletion only hides the version if it too was committed before this
/// transaction began.
fn repeatable_read(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = t.xid();
    let xmin = entry.xmin();
    let xmax = entry.xmax();

    if xmin == xid && xmax.as_u64() == 0 {
        return Ok(true);
    }
    if tm.is_committed(xmin)? && xmin < xid && !t.in_snapshot(xmin) {
        if xmax.as_u64() == 0 {
            return Ok(true);
        }
        if xmax != xid
            && (!tm.is_committed(xmax)? || xmax > xid || t.in_snapshot(xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
