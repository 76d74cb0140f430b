//! Data manager: the insert/read path over slotted pages, the free-space
//! index, and crash recovery.
//!
//! Owns the page pool, the WAL and a reference-counted cache of data item
//! handles. Every page mutation is preceded by a durable log record.

use std::ops::Deref;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::cache::{RefCache, Store};
use crate::error::{Error, Result};
use crate::page::{self, PagePool, PageRef, FSO_LEN, MAX_FREE};
use crate::paths::DbBase;
use crate::tm::TxnManager;
use crate::wal::Wal;
use crate::{Uid, Xid, PAGE_SIZE};

pub mod item;
mod page_index;
mod records;
mod recover;

pub use item::{DataItem, ItemRead, ItemWrite, ITEM_HEADER_LEN};

use item::wrap;
use page_index::PageIndex;
use records::WalRecord;

/// How many rounds of page selection to attempt before giving up with
/// `DatabaseBusy`.
const INSERT_ATTEMPTS: usize = 5;

struct ItemStore {
    pool: PagePool,
    wal: Arc<Wal>,
}

impl Store for ItemStore {
    type Key = Uid;
    type Entry = DataItem;

    fn load(&self, uid: Uid) -> Result<DataItem> {
        let page = self.pool.get(uid.pgno())?;
        let off = uid.off() as usize;
        if off < FSO_LEN || off + ITEM_HEADER_LEN > PAGE_SIZE {
            return Err(Error::NullEntry);
        }
        let size = {
            let buf = page.lock();
            u16::from_le_bytes([buf.data[off + 1], buf.data[off + 2]])
        };
        if off + ITEM_HEADER_LEN + size as usize > PAGE_SIZE {
            return Err(Error::NullEntry);
        }
        Ok(DataItem::new(uid, size, page, self.wal.clone()))
    }

    fn unload(&self, _uid: Uid, _item: &DataItem) {
        // Dropping the item drops its page pin; the page pool handles
        // write-back.
    }
}

/// A pinned data item handle; returned to the cache when dropped.
pub struct ItemRef {
    item: Arc<DataItem>,
    cache: Arc<RefCache<ItemStore>>,
}

impl Deref for ItemRef {
    type Target = DataItem;

    fn deref(&self) -> &DataItem {
        &self.item
    }
}

impl Drop for ItemRef {
    fn drop(&mut self) {
        self.cache.release(self.item.uid());
    }
}

pub struct DataManager {
    pool: PagePool,
    wal: Arc<Wal>,
    items: Arc<RefCache<ItemStore>>,
    index: PageIndex,
    page_one: Mutex<Option<PageRef>>,
}

impl DataManager {
    /// Initialises a fresh database: data file with its metadata page, and
    /// an empty log.
    pub fn create(base: &DbBase, mem: u64, _tm: &Arc<TxnManager>) -> Result<Self> {
        let capacity = (mem / PAGE_SIZE as u64) as usize;
        let pool = PagePool::create(&base.db(), capacity)?;
        let wal = Arc::new(Wal::create(&base.log())?);

        let pgno = pool.new_page(&page::first_init())?;
        debug_assert_eq!(pgno, 1);
        let page_one = pool.get(1)?;
        pool.flush_page(&page_one);

        Ok(Self::assemble(pool, wal, page_one))
    }

    /// Opens an existing database, running recovery if the previous
    /// shutdown was not clean, then rebuilding the free-space index.
    pub fn open(base: &DbBase, mem: u64, tm: &Arc<TxnManager>) -> Result<Self> {
        let capacity = (mem / PAGE_SIZE as u64) as usize;
        let wal = Arc::new(Wal::open(&base.log())?);
        let pool = PagePool::open(&base.db(), capacity)?;

        {
            let page_one = pool.get(1)?;
            if !page::is_clean(&page_one) {
                drop(page_one);
                recover::recover(tm, &wal, &pool)?;
            }
        }

        let page_one = pool.get(1)?;
        page::stamp_open_mark(&page_one);
        pool.flush_page(&page_one);

        let dm = Self::assemble(pool, wal, page_one);
        for pgno in 2..=dm.pool.page_count() {
            let page = dm.pool.get(pgno)?;
            dm.index.add(pgno, page.free_space());
        }
        Ok(dm)
    }

    fn assemble(pool: PagePool, wal: Arc<Wal>, page_one: PageRef) -> Self {
        // Item handles are not separately bounded: each pins a page, and the
        // page pool's budget is what actually limits residency.
        let items = Arc::new(RefCache::new(
            ItemStore {
                pool: pool.clone(),
                wal: wal.clone(),
            },
            usize::MAX,
        ));
        DataManager {
            pool,
            wal,
            items,
            index: PageIndex::new(),
            page_one: Mutex::new(Some(page_one)),
        }
    }

    /// Inserts a payload, returning its uid.
    ///
    /// The INSERT log record is appended (and fsynced) before the page is
    /// touched. The selected page's descriptor is re-added to the
    /// free-space index on every exit path.
    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        let raw = wrap(payload);
        if raw.len() > MAX_FREE {
            return Err(Error::DataTooLarge(payload.len()));
        }

        let mut selected = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(ps) = self.index.select(raw.len()) {
                selected = Some(ps);
                break;
            }
            let pgno = self.pool.new_page(&page::blank())?;
            self.index.add(pgno, MAX_FREE);
        }
        let Some(ps) = selected else {
            return Err(Error::DatabaseBusy);
        };

        let page = match self.pool.get(ps.pgno) {
            Ok(page) => page,
            Err(e) => {
                self.index.add(ps.pgno, ps.free);
                return Err(e);
            }
        };
        let page = scopeguard::guard(page, |page| {
            self.index.add(page.pgno(), page.free_space());
        });

        let off = page.fso();
        let rec = WalRecord::Insert {
            xid,
            pgno: ps.pgno,
            off,
            raw: raw.clone(),
        };
        self.wal.append(&rec.encode());

        let written_at = page.insert(&raw);
        debug_assert_eq!(off, written_at);
        Ok(Uid::new(ps.pgno, off))
    }

    /// Fetches the item at `uid`; `None` if it has been deleted.
    pub fn read(&self, uid: Uid) -> Result<Option<ItemRef>> {
        let item = self.items.get(uid)?;
        let item = ItemRef {
            item,
            cache: self.items.clone(),
        };
        if !item.is_valid() {
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Flushes everything and stamps the clean-shutdown witness.
    pub fn close(&self) {
        self.items.close();
        self.wal.close();
        let page_one = self.page_one.lock().take();
        if let Some(page_one) = page_one {
            page::stamp_close_mark(&page_one);
            self.pool.flush_page(&page_one);
        }
        self.pool.close();
        info!("data manager closed");
    }
}
