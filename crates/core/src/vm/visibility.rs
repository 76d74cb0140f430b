//! MVCC visibility rules.
//!
//! A version stamped `(xmin, xmax)` is tested against a reader's xid,
//! isolation level and (for repeatable read) the snapshot of xids active at
//! its begin. Read committed sees any committed-created, not
//! committed-deleted version; repeatable read additionally hides versions
//! created by transactions that began after the reader or were active when
//! it began, and ignores such transactions' deletes.

use crate::tm::TxnManager;
use crate::vm::Transaction;
use crate::Xid;

pub(crate) fn is_visible(tm: &TxnManager, t: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    match t.level {
        super::IsolationLevel::ReadCommitted => read_committed(tm, t, xmin, xmax),
        super::IsolationLevel::RepeatableRead => repeatable_read(tm, t, xmin, xmax),
    }
}

fn read_committed(tm: &TxnManager, t: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    if xmin == t.xid && xmax == 0 {
        return true;
    }
    if tm.is_committed(xmin) {
        if xmax == 0 {
            return true;
        }
        if xmax != t.xid && !tm.is_committed(xmax) {
            return true;
        }
    }
    false
}

fn repeatable_read(tm: &TxnManager, t: &Transaction, xmin: Xid, xmax: Xid) -> bool {
    if xmin == t.xid && xmax == 0 {
        return true;
    }
    if tm.is_committed(xmin) && xmin < t.xid && !t.in_snapshot(xmin) {
        if xmax == 0 {
            return true;
        }
        if xmax != t.xid && (!tm.is_committed(xmax) || xmax > t.xid || t.in_snapshot(xmax)) {
            return true;
        }
    }
    false
}
