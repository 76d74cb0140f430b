//! Data items: variable-length slotted-page records.
//!
//! On-page layout at offset `off`: `[valid(1) | size(2) | data(size)]`,
//! `valid == 1` meaning logically deleted. Once assigned, an item's
//! position and size never change; mutations overwrite the data region in
//! place, bracketed by [`DataItem::before`] so an UPDATE log record is
//! emitted (or the snapshot restored) before the write lock is released.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dm::records::WalRecord;
use crate::page::PageRef;
use crate::wal::Wal;
use crate::{Uid, Xid};

/// `valid(1) + size(2)`.
pub const ITEM_HEADER_LEN: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Wraps a payload into on-page item format.
pub(crate) fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(ITEM_HEADER_LEN + payload.len());
    raw.push(VALID);
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// A handle over one data item. Holds a pin on the containing page; the
/// payload itself lives in the page buffer and is only touched under the
/// page mutex.
pub struct DataItem {
    uid: Uid,
    off: u16,
    size: u16,
    page: PageRef,
    lock: RwLock<()>,
    wal: Arc<Wal>,
}

impl DataItem {
    pub(crate) fn new(uid: Uid, size: u16, page: PageRef, wal: Arc<Wal>) -> Self {
        DataItem {
            uid,
            off: uid.off(),
            size,
            page,
            lock: RwLock::new(()),
            wal,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    fn raw_range(&self) -> Range<usize> {
        self.off as usize..self.off as usize + ITEM_HEADER_LEN + self.size as usize
    }

    fn payload_range(&self) -> Range<usize> {
        self.off as usize + ITEM_HEADER_LEN..self.off as usize + ITEM_HEADER_LEN + self.size as usize
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.page.lock().data[self.off as usize] == VALID
    }

    fn copy_payload(&self) -> Vec<u8> {
        self.page.lock().data[self.payload_range()].to_vec()
    }

    /// A copy of the payload, taken under the item's read lock so a reader
    /// observes either a pre- or post-update state, never a torn one.
    pub fn read(&self) -> Vec<u8> {
        let _r = self.lock.read();
        self.copy_payload()
    }

    /// Holds the item's read lock across several reads.
    pub fn read_locked(&self) -> ItemRead<'_> {
        ItemRead {
            item: self,
            _guard: self.lock.read(),
        }
    }

    /// Begins an in-place update: takes the item's write lock, marks the
    /// page dirty and snapshots the item bytes for undo.
    ///
    /// The returned guard must be finished with [`ItemWrite::log`] (emit the
    /// UPDATE record) or [`ItemWrite::rollback`] (restore the snapshot);
    /// either way the write lock is released when the guard goes away.
    pub fn before(&self) -> ItemWrite<'_> {
        let guard = self.lock.write();
        let old_raw = {
            let mut buf = self.page.lock();
            buf.dirty = true;
            buf.data[self.raw_range()].to_vec()
        };
        ItemWrite {
            item: self,
            old_raw,
            _guard: guard,
        }
    }
}

/// Read guard over a [`DataItem`].
pub struct ItemRead<'a> {
    item: &'a DataItem,
    _guard: RwLockReadGuard<'a, ()>,
}

impl ItemRead<'_> {
    pub fn payload(&self) -> Vec<u8> {
        self.item.copy_payload()
    }
}

/// Write bracket over a [`DataItem`], created by [`DataItem::before`].
#[must_use = "an item write must be finished with log() or rollback()"]
pub struct ItemWrite<'a> {
    item: &'a DataItem,
    old_raw: Vec<u8>,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ItemWrite<'_> {
    /// The payload as of [`DataItem::before`].
    pub fn old_payload(&self) -> &[u8] {
        &self.old_raw[ITEM_HEADER_LEN..]
    }

    pub fn payload(&self) -> Vec<u8> {
        self.item.copy_payload()
    }

    /// Overwrites the payload in place. The length cannot change.
    pub fn set_payload(&mut self, payload: &[u8]) {
        assert_eq!(payload.len(), self.item.size(), "item size is immutable");
        let mut buf = self.item.page.lock();
        let range = self.item.payload_range();
        buf.data[range].copy_from_slice(payload);
    }

    /// Appends the UPDATE record for this mutation, then releases the write
    /// lock. WAL ordering: the record is durable before the caller can
    /// acknowledge anything.
    pub fn log(self, xid: Xid) {
        let rec = WalRecord::Update {
            xid,
            uid: self.item.uid,
            old: self.old_raw[ITEM_HEADER_LEN..].to_vec(),
            new: self.item.copy_payload(),
        };
        self.item.wal.append(&rec.encode());
    }

    /// Restores the snapshot taken by [`DataItem::before`] and releases the
    /// write lock without logging anything.
    pub fn rollback(self) {
        let mut buf = self.item.page.lock();
        let range = self.item.raw_range();
        buf.data[range].copy_from_slice(&self.old_raw);
    }
}
