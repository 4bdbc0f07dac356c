use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{DbError, Result, Xid};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Sees every committed version, even ones committed after it began.
    ReadCommitted = 0,
    /// Sees only versions committed before it began.
    RepeatableRead = 1,
}

/// A fault that sticks to a transaction. Once set, every later operation on
/// the transaction re-raises it without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ConcurrentUpdate,
}

impl From<Fault> for DbError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::ConcurrentUpdate => DbError::ConcurrentUpdate,
        }
    }
}

/// In-memory state of a live transaction.
pub struct Transaction {
    xid: Xid,
    level: IsolationLevel,
    /// XIDs that were active when this transaction began. Empty under
    /// read-committed; the super XID is never included.
    snapshot: HashSet<u64>,
    fault: Mutex<Option<Fault>>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    pub fn new(
        xid: Xid,
        level: IsolationLevel,
        active: &HashMap<u64, Arc<Transaction>>,
    ) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => {
                active.keys().copied().filter(|&x| x != 0).collect()
            }
        };
        Self {
            xid,
            level,
            snapshot,
            fault: Mutex::new(None),
            auto_aborted: AtomicBool::new(false),
        }
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn in_snapshot(&self, xid: Xid) -> bool {
        !xid.is_super() && self.snapshot.contains(&xid.as_u64())
    }

    /// Re-raises the sticky fault, if any.
    pub fn check_fault(&self) -> Result<()> {
        match *self.fault.lock() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock() = Some(fault);
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::Acquire)
    }

    pub fn set_auto_aborted(&self) {
        self.auto_aborted.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_with(xids: &[u64]) -> HashMap<u64, Arc<Transaction>> {
        let mut map = HashMap::new();
        for &x in xids {
            map.insert(
                x,
                Arc::new(Transaction::new(
                    Xid::new(x),
                    IsolationLevel::ReadCommitted,
                    &HashMap::new(),
                )),
            );
        }
        map
    }

    #[test]
    fn test_read_committed_has_no_snapshot() {
        let t = Transaction::new(
            Xid::new(5),
            IsolationLevel::ReadCommitted,
            &active_with(&[2, 3]),
        );
        assert!(!t.in_snapshot(Xid::new(2)));
        assert!(!t.in_snapshot(Xid::new(3)));
    }

    #[test]
    fn test_repeatable_read_snapshots_active_set() {
        let t = Transaction::new(
            Xid::new(5),
            IsolationLevel::RepeatableRead,
            &active_with(&[0, 2, 3]),
        );
        assert!(t.in_snapshot(Xid::new(2)));
        assert!(t.in_snapshot(Xid::new(3)));
        assert!(!t.in_snapshot(Xid::new(4)));
        // The super XID never counts as in-snapshot.
        assert!(!t.in_snapshot(Xid::new(0)));
    }

    #[test]
    fn test_sticky_fault() {
        let t = Transaction::new(
            Xid::new(1),
            IsolationLevel::ReadCommitted,
            &HashMap::new(),
        );
        assert!(t.check_fault().is_ok());
        t.set_fault(Fault::ConcurrentUpdate);
        assert!(matches!(
            t.check_fault(),
            Err(DbError::ConcurrentUpdate)
        ));
        // Still set afterwards.
        assert!(t.check_fault().is_err());
    }
}
