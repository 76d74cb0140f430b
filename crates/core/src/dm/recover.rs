//! Crash recovery, invoked when page 1's open/close marks disagree.
//!
//! Three passes over the log:
//!
//! 1. scan every record, truncating the data file to the highest page any
//!    record touches (pages only half-created at the crash, with no
//!    surviving record, are discarded);
//! 2. REDO every record whose xid is not active, reapplying the write;
//! 3. UNDO the records of still-active xids in reverse order, then mark
//!    those xids aborted.
//!
//! The log's checksum is fsynced before any page write acknowledges its
//! caller, so recovery tolerates arbitrary loss of unlogged page state.

use std::collections::HashMap;

use log::{info, warn};

use crate::dm::item::ITEM_HEADER_LEN;
use crate::dm::records::WalRecord;
use crate::error::Result;
use crate::page::PagePool;
use crate::tm::TxnManager;
use crate::wal::Wal;
use crate::Xid;

pub(crate) fn recover(tm: &TxnManager, wal: &Wal, pool: &PagePool) -> Result<()> {
    info!("database was not shut down cleanly, recovering");

    let mut records = Vec::new();
    let mut max_pgno = 1;
    let mut iter = wal.iter();
    while let Some(body) = iter.next().transpose()? {
        match WalRecord::decode(&body) {
            Some(rec) => {
                max_pgno = max_pgno.max(rec.pgno());
                records.push(rec);
            }
            None => warn!("skipping malformed log record"),
        }
    }
    pool.truncate_to(max_pgno)?;

    redo(tm, pool, &records)?;
    undo(tm, pool, &records)?;
    info!("recovery complete: {} log records replayed", records.len());
    Ok(())
}

fn redo(tm: &TxnManager, pool: &PagePool, records: &[WalRecord]) -> Result<()> {
    for rec in records {
        if tm.is_active(rec.xid()) {
            continue;
        }
        match rec {
            WalRecord::Insert { pgno, off, raw, .. } => {
                let page = pool.get(*pgno)?;
                page.recover_insert(raw, *off);
            }
            WalRecord::Update { uid, new, .. } => {
                let page = pool.get(uid.pgno())?;
                page.recover_write(new, uid.off() + ITEM_HEADER_LEN as u16);
            }
        }
    }
    Ok(())
}

fn undo(tm: &TxnManager, pool: &PagePool, records: &[WalRecord]) -> Result<()> {
    let mut active: HashMap<Xid, Vec<&WalRecord>> = HashMap::new();
    for rec in records {
        if tm.is_active(rec.xid()) {
            active.entry(rec.xid()).or_default().push(rec);
        }
    }

    for (xid, recs) in active {
        for rec in recs.into_iter().rev() {
            match rec {
                WalRecord::Insert { pgno, off, raw, .. } => {
                    // Flip the item to deleted and write it back.
                    let mut raw = raw.clone();
                    raw[0] = 1;
                    let page = pool.get(*pgno)?;
                    page.recover_insert(&raw, *off);
                }
                WalRecord::Update { uid, old, .. } => {
                    let page = pool.get(uid.pgno())?;
                    page.recover_write(old, uid.off() + ITEM_HEADER_LEN as u16);
                }
            }
        }
        tm.abort(xid);
        info!("aborted in-flight transaction {xid}");
    }
    Ok(())
}
