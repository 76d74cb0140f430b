//! The lock table: exclusive write locks on uids, FIFO hand-off, and
//! wait-for-graph deadlock detection.
//!
//! All bookkeeping lives under a single mutex, held only to mutate the
//! maps, never across I/O. Since a transaction waits on at most one uid at
//! a time, the wait-for graph is a set of chains: detection walks
//! `waits` then `locked` alternately from the requester until the chain
//! ends, revisits some other xid, or returns to the requester (a cycle).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::{Uid, Xid};

pub(crate) struct LockTable {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    /// Current exclusive holder of each uid.
    locked: HashMap<Uid, Xid>,
    /// Uids held, per xid.
    held: HashMap<Xid, Vec<Uid>>,
    /// The single uid each blocked xid is waiting for.
    waits: HashMap<Xid, Uid>,
    /// FIFO of waiters per uid.
    waited: HashMap<Uid, VecDeque<Xid>>,
    /// Park/wake primitive of each blocked xid.
    slots: HashMap<Xid, Arc<WaitSlot>>,
}

#[derive(Default)]
struct WaitSlot {
    granted: Mutex<bool>,
    wake: Condvar,
}

impl Tables {
    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.locked.insert(uid, xid);
        self.held.entry(xid).or_default().push(uid);
    }

    /// Whether the chain starting at `start` loops back to it.
    fn closes_cycle(&self, start: Xid) -> bool {
        let mut seen = HashSet::new();
        let mut cur = start;
        loop {
            let Some(uid) = self.waits.get(&cur) else {
                return false;
            };
            let Some(&holder) = self.locked.get(uid) else {
                return false;
            };
            if holder == start {
                return true;
            }
            if !seen.insert(holder) {
                // Revisiting any xid other than `start` means the chain
                // merged into one already checked.
                return false;
            }
            cur = holder;
        }
    }
}

impl LockTable {
    pub fn new() -> Self {
        LockTable {
            inner: Mutex::new(Tables::default()),
        }
    }

    /// Acquires the exclusive lock on `uid` for `xid`, parking until the
    /// current holder releases. Re-acquisition by the holder is a no-op.
    ///
    /// Fails with [`Error::Deadlock`] when enqueueing this request would
    /// close a cycle in the wait-for graph; the enqueue is undone and the
    /// caller is expected to abort `xid`.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<()> {
        let slot = {
            let mut t = self.inner.lock();
            match t.locked.get(&uid) {
                None => {
                    t.grant(xid, uid);
                    return Ok(());
                }
                Some(&holder) if holder == xid => return Ok(()),
                Some(_) => {}
            }

            t.waits.insert(xid, uid);
            t.waited.entry(uid).or_default().push_back(xid);
            if t.closes_cycle(xid) {
                t.waits.remove(&xid);
                t.waited
                    .get_mut(&uid)
                    .expect("queue was just pushed")
                    .retain(|&w| w != xid);
                debug!("deadlock: xid {xid} waiting for {uid:?}");
                return Err(Error::Deadlock);
            }

            let slot = Arc::new(WaitSlot::default());
            t.slots.insert(xid, slot.clone());
            slot
        };

        let mut granted = slot.granted.lock();
        while !*granted {
            slot.wake.wait(&mut granted);
        }
        Ok(())
    }

    /// Releases every lock held by `xid`, handing each uid to its first
    /// waiter (FIFO) and waking it.
    pub fn release_all(&self, xid: Xid) {
        let mut wake = Vec::new();
        {
            let mut t = self.inner.lock();
            for uid in t.held.remove(&xid).unwrap_or_default() {
                let next = t.waited.get_mut(&uid).and_then(VecDeque::pop_front);
                match next {
                    Some(waiter) => {
                        t.grant(waiter, uid);
                        t.waits.remove(&waiter);
                        if let Some(slot) = t.slots.remove(&waiter) {
                            wake.push(slot);
                        }
                    }
                    None => {
                        t.locked.remove(&uid);
                    }
                }
            }
            t.slots.remove(&xid);
        }
        for slot in wake {
            *slot.granted.lock() = true;
            slot.wake.notify_all();
        }
    }
}
