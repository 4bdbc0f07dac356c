use std::collections::HashMap;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::common::{DbError, Result, Uid, Xid};

/// A parked lock request. The lock table opens the gate when ownership is
/// handed over; until then the requester blocks in `wait`.
pub struct WaitGate {
    rx: Receiver<()>,
}

impl WaitGate {
    /// Blocks until the lock is granted. A closed channel means the table
    /// was torn down with the grant already decided, which counts the same.
    pub fn wait(self) {
        let _ = self.rx.recv();
    }
}

#[derive(Default)]
struct State {
    /// UIDs each transaction currently holds.
    held: HashMap<u64, Vec<u64>>,
    /// Owning transaction of each locked UID.
    owner: HashMap<u64, u64>,
    /// FIFO queue of transactions waiting for each UID.
    wait_queue: HashMap<u64, Vec<u64>>,
    /// The single UID each waiting transaction is blocked on.
    waiting_for: HashMap<u64, u64>,
    /// Wake-up channel for each waiting transaction.
    gates: HashMap<u64, Sender<()>>,
    /// DFS visit stamps, reused across detection runs.
    stamps: HashMap<u64, u64>,
    stamp: u64,
}

/// Pessimistic row-lock table over a wait-for graph.
///
/// A transaction waits on at most one UID at a time, so the graph has
/// out-degree one per waiter and a cycle check is a stamped DFS along
/// `waiter -> wanted UID -> owner`. The request that would close a cycle is
/// the one that fails; established waiters are never disturbed.
pub struct LockTable {
    state: Mutex<State>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Requests `uid` for `xid`. Returns None when the lock is held (or was
    /// free), a gate to block on when someone else owns it, or `Deadlock`
    /// when waiting would close a cycle.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<Option<WaitGate>> {
        let xid = xid.as_u64();
        let uid = uid.as_u64();
        let mut state = self.state.lock();

        if state.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(None);
        }
        if !state.owner.contains_key(&uid) {
            state.owner.insert(uid, xid);
            state.held.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        state.waiting_for.insert(xid, uid);
        state.wait_queue.entry(uid).or_default().push(xid);
        if has_cycle(&mut state) {
            state.waiting_for.remove(&xid);
            let queue = state.wait_queue.get_mut(&uid).unwrap();
            queue.retain(|&w| w != xid);
            if queue.is_empty() {
                state.wait_queue.remove(&uid);
            }
            return Err(DbError::Deadlock);
        }

        let (tx, rx) = bounded(1);
        state.gates.insert(xid, tx);
        Ok(Some(WaitGate { rx }))
    }

    /// Releases everything `xid` holds, handing each UID to the first
    /// transaction still queued on it, and clears `xid`'s wait state.
    pub fn release_all(&self, xid: Xid) {
        let xid = xid.as_u64();
        let mut state = self.state.lock();

        if let Some(uids) = state.held.remove(&xid) {
            for uid in uids {
                grant_next(&mut state, uid);
            }
        }
        state.waiting_for.remove(&xid);
        state.gates.remove(&xid);
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands `uid` to the first queued transaction that is still waiting and
/// opens its gate.
fn grant_next(state: &mut State, uid: u64) {
    state.owner.remove(&uid);
    let Some(mut queue) = state.wait_queue.remove(&uid) else {
        return;
    };

    while !queue.is_empty() {
        let next = queue.remove(0);
        if let Some(gate) = state.gates.remove(&next) {
            state.owner.insert(uid, next);
            state.held.entry(next).or_default().push(uid);
            state.waiting_for.remove(&next);
            let _ = gate.send(());
            break;
        }
    }

    if !queue.is_empty() {
        state.wait_queue.insert(uid, queue);
    }
}

fn has_cycle(state: &mut State) -> bool {
    state.stamps.clear();
    state.stamp = 1;
    let holders: Vec<u64> = state.held.keys().copied().collect();
    for xid in holders {
        if state.stamps.get(&xid).is_some() {
            continue;
        }
        state.stamp += 1;
        if dfs(state, xid) {
            return true;
        }
    }
    false
}

fn dfs(state: &mut State, xid: u64) -> bool {
    match state.stamps.get(&xid) {
        // Seen again within the current walk: a cycle.
        Some(&s) if s == state.stamp => return true,
        // Part of an earlier, cycle-free walk.
        Some(_) => return false,
        None => {}
    }
    state.stamps.insert(xid, state.stamp);

    let Some(&uid) = state.waiting_for.get(&xid) else {
        return false;
    };
    let Some(&owner) = state.owner.get(&uid) else {
        return false;
    };
    dfs(state, owner)
}
