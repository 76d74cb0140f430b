//! Version manager: MVCC stacked on the data manager.
//!
//! Every entry is a data item whose payload is
//! `[xmin(8) | xmax(8) | record]`: the xid that created the version, the
//! xid that logically deleted it (0 while live), and the opaque record
//! bytes. Conflicting deletes serialise through the lock table; a deadlock
//! or concurrent update auto-aborts the requesting transaction and poisons
//! it until the client closes it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::dm::DataManager;
use crate::error::{Error, Result};
use crate::tm::TxnManager;
use crate::{Uid, Xid, SUPER_XID};

mod lock_table;
mod visibility;

use lock_table::LockTable;

/// `xmin(8) + xmax(8)`.
pub const ENTRY_HEADER_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
}

/// Why a transaction was auto-aborted. Re-raised on every subsequent
/// operation until the client issues commit or abort.
#[derive(Clone, Copy, Debug)]
enum Poison {
    Deadlock,
    ConcurrentUpdate,
}

impl From<Poison> for Error {
    fn from(p: Poison) -> Error {
        match p {
            Poison::Deadlock => Error::Deadlock,
            Poison::ConcurrentUpdate => Error::ConcurrentUpdate,
        }
    }
}

pub(crate) struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Xids active at begin; empty for read committed.
    pub snapshot: HashSet<Xid>,
    pub auto_aborted: bool,
    pub err: Option<Poison>,
}

impl Transaction {
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }
}

pub struct VersionManager {
    tm: Arc<TxnManager>,
    dm: Arc<DataManager>,
    txns: Mutex<HashMap<Xid, Transaction>>,
    locks: LockTable,
}

impl VersionManager {
    pub fn new(tm: Arc<TxnManager>, dm: Arc<DataManager>) -> Self {
        let mut txns = HashMap::new();
        txns.insert(
            SUPER_XID,
            Transaction {
                xid: SUPER_XID,
                level: IsolationLevel::ReadCommitted,
                snapshot: HashSet::new(),
                auto_aborted: false,
                err: None,
            },
        );
        VersionManager {
            tm,
            dm,
            txns: Mutex::new(txns),
            locks: LockTable::new(),
        }
    }

    pub fn tm(&self) -> &Arc<TxnManager> {
        &self.tm
    }

    pub fn dm(&self) -> &Arc<DataManager> {
        &self.dm
    }

    /// Starts a transaction. For repeatable read, the set of xids active at
    /// this instant becomes its snapshot; the map lock makes begin and
    /// snapshot capture atomic.
    pub fn begin(&self, level: IsolationLevel) -> Xid {
        let mut txns = self.txns.lock();
        let xid = self.tm.begin();
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => {
                txns.keys().copied().filter(|&x| x != SUPER_XID).collect()
            }
        };
        txns.insert(
            xid,
            Transaction {
                xid,
                level,
                snapshot,
                auto_aborted: false,
                err: None,
            },
        );
        debug!("begin xid {xid} ({level:?})");
        xid
    }

    fn check_poisoned(&self, xid: Xid) -> Result<()> {
        let txns = self.txns.lock();
        let t = txns.get(&xid).expect("operation on unknown xid");
        match t.err {
            Some(p) => Err(p.into()),
            None => Ok(()),
        }
    }

    /// Reads the record at `uid` if a version is visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.check_poisoned(xid)?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(None);
        };
        let payload = item.read();
        let (xmin, xmax, record) = parse_entry(&payload)?;

        let txns = self.txns.lock();
        let t = txns.get(&xid).expect("operation on unknown xid");
        if visibility::is_visible(&self.tm, t, xmin, xmax) {
            Ok(Some(record.to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Reads the entry at `uid` regardless of visibility, returning its
    /// stamps alongside the record. Used by the catalog to traverse its
    /// table chain through dropped entries.
    pub fn read_raw(&self, uid: Uid) -> Result<Option<(Xid, Xid, Vec<u8>)>> {
        let Some(item) = self.dm.read(uid)? else {
            return Ok(None);
        };
        let payload = item.read();
        let (xmin, xmax, record) = parse_entry(&payload)?;
        Ok(Some((xmin, xmax, record.to_vec())))
    }

    /// Inserts a new version stamped `(xid, 0)`.
    pub fn insert(&self, xid: Xid, record: &[u8]) -> Result<Uid> {
        self.check_poisoned(xid)?;
        let mut payload = Vec::with_capacity(ENTRY_HEADER_LEN + record.len());
        payload.extend_from_slice(&xid.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(record);
        self.dm.insert(xid, &payload)
    }

    /// Logically deletes the version at `uid`.
    ///
    /// Returns `false` when no version is visible to `xid` or it already
    /// carries this transaction's delete stamp. A wait-for cycle or a
    /// competing committed delete auto-aborts `xid` and surfaces
    /// [`Error::Deadlock`] / [`Error::ConcurrentUpdate`]; all locks are
    /// released on that path.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.check_poisoned(xid)?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(false);
        };
        {
            let payload = item.read();
            let (xmin, xmax, _) = parse_entry(&payload)?;
            let txns = self.txns.lock();
            let t = txns.get(&xid).expect("operation on unknown xid");
            if !visibility::is_visible(&self.tm, t, xmin, xmax) {
                return Ok(false);
            }
            if xmax == xid {
                return Ok(false);
            }
        }

        if let Err(e) = self.locks.acquire(xid, uid) {
            debug_assert!(matches!(e, Error::Deadlock));
            return Err(self.poison(xid, Poison::Deadlock));
        }

        // Re-check under the lock: a competitor may have stamped the entry
        // while this transaction waited. A stamp from an aborted competitor
        // (e.g. a deadlock victim) is void and gets overwritten.
        let mut w = item.before();
        let payload = w.payload();
        let (_, xmax, _) = parse_entry(&payload)?;
        if xmax == xid {
            w.rollback();
            return Ok(false);
        }
        if xmax != 0 && self.tm.is_committed(xmax) {
            w.rollback();
            return Err(self.poison(xid, Poison::ConcurrentUpdate));
        }

        let mut payload = payload;
        payload[8..16].copy_from_slice(&xid.to_le_bytes());
        w.set_payload(&payload);
        w.log(xid);
        Ok(true)
    }

    /// Commits `xid`. A poisoned transaction re-raises its terminal error
    /// and stays open until aborted.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        {
            let txns = self.txns.lock();
            let t = txns.get(&xid).expect("operation on unknown xid");
            if let Some(p) = t.err {
                return Err(p.into());
            }
        }
        self.txns.lock().remove(&xid);
        self.tm.commit(xid);
        self.locks.release_all(xid);
        debug!("commit xid {xid}");
        Ok(())
    }

    pub fn abort(&self, xid: Xid) {
        self.intern_abort(xid, false);
    }

    /// Marks the transaction poisoned and aborts it on the engine's own
    /// initiative, releasing its locks. The entry stays in the map so the
    /// terminal error is re-raised until the client closes the transaction.
    fn poison(&self, xid: Xid, p: Poison) -> Error {
        {
            let mut txns = self.txns.lock();
            let t = txns.get_mut(&xid).expect("operation on unknown xid");
            t.err = Some(p);
        }
        self.intern_abort(xid, true);
        let mut txns = self.txns.lock();
        if let Some(t) = txns.get_mut(&xid) {
            t.auto_aborted = true;
        }
        p.into()
    }

    fn intern_abort(&self, xid: Xid, auto: bool) {
        let already_auto_aborted = {
            let mut txns = self.txns.lock();
            let t = txns.get(&xid).expect("operation on unknown xid");
            let already = t.auto_aborted;
            if !auto {
                txns.remove(&xid);
            }
            already
        };
        if already_auto_aborted {
            return;
        }
        self.locks.release_all(xid);
        self.tm.abort(xid);
        debug!("abort xid {xid} (auto: {auto})");
    }
}

fn parse_entry(payload: &[u8]) -> Result<(Xid, Xid, &[u8])> {
    if payload.len() < ENTRY_HEADER_LEN {
        return Err(Error::NullEntry);
    }
    let xmin = u64::from_le_bytes(payload[..8].try_into().unwrap());
    let xmax = u64::from_le_bytes(payload[8..16].try_into().unwrap());
    Ok((xmin, xmax, &payload[ENTRY_HEADER_LEN..]))
}
