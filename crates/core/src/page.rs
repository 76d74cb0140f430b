//! Pages and the bounded page pool.
//!
//! All pages are [`PAGE_SIZE`] bytes. Page 1 holds the open/close marks used
//! to detect unclean shutdown; every other page starts with a 2-byte
//! free-space offset (FSO) pointing at the first unallocated byte, followed
//! by a contiguous run of data items. Free space is never compacted.

use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::info;
use parking_lot::{Mutex, MutexGuard};

use crate::cache::{RefCache, Store};
use crate::error::{open_error, Error, Result};
use crate::{fio, Pgno, PAGE_SIZE};

/// Fewer pages than this is a fatal configuration error.
pub const MIN_POOL_PAGES: usize = 10;

/// Byte range of the random token written at open.
const OPEN_MARK: std::ops::Range<usize> = 100..108;
/// Byte range of the token copy written at clean shutdown.
const CLOSE_MARK: std::ops::Range<usize> = 108..116;

/// First byte available to data items on a regular page; bytes `[0, 2)`
/// hold the FSO.
pub const FSO_LEN: usize = 2;

/// Free space of a freshly initialised regular page.
pub const MAX_FREE: usize = PAGE_SIZE - FSO_LEN;

/// An in-memory page. The buffer and dirty bit are guarded by the per-page
/// mutex; every mutation must go through [`Page::lock`] and set `dirty`.
pub struct Page {
    pgno: Pgno,
    buf: Mutex<PageBuf>,
}

pub(crate) struct PageBuf {
    pub data: Box<[u8]>,
    pub dirty: bool,
}

impl Page {
    fn new(pgno: Pgno, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Page {
            pgno,
            buf: Mutex::new(PageBuf { data, dirty: false }),
        }
    }

    pub fn pgno(&self) -> Pgno {
        self.pgno
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PageBuf> {
        self.buf.lock()
    }

    /// The page's free-space offset.
    pub fn fso(&self) -> u16 {
        get_fso(&self.lock().data)
    }

    pub fn free_space(&self) -> usize {
        PAGE_SIZE - self.fso() as usize
    }

    /// Appends `raw` at the FSO, advancing it. Returns the slot offset.
    ///
    /// The caller must have verified that `raw` fits; pages handed out by
    /// the free-space index guarantee it.
    pub(crate) fn insert(&self, raw: &[u8]) -> u16 {
        let mut buf = self.lock();
        let off = get_fso(&buf.data);
        let end = off as usize + raw.len();
        assert!(end <= PAGE_SIZE, "item overflows page {}", self.pgno);
        buf.data[off as usize..end].copy_from_slice(raw);
        set_fso(&mut buf.data, end as u16);
        buf.dirty = true;
        off
    }

    /// Recovery write of an item at a recorded offset, raising the FSO if
    /// the item extends past it.
    pub(crate) fn recover_insert(&self, raw: &[u8], off: u16) {
        let mut buf = self.lock();
        let end = off as usize + raw.len();
        buf.data[off as usize..end].copy_from_slice(raw);
        if end as u16 > get_fso(&buf.data) {
            set_fso(&mut buf.data, end as u16);
        }
        buf.dirty = true;
    }

    /// Recovery write of raw bytes at a recorded offset; the FSO is left
    /// alone.
    pub(crate) fn recover_write(&self, raw: &[u8], off: u16) {
        let mut buf = self.lock();
        buf.data[off as usize..off as usize + raw.len()].copy_from_slice(raw);
        buf.dirty = true;
    }
}

fn get_fso(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn set_fso(data: &mut [u8], fso: u16) {
    data[..FSO_LEN].copy_from_slice(&fso.to_le_bytes());
}

/// A blank regular page: FSO pointing just past itself, no items.
pub(crate) fn blank() -> Box<[u8]> {
    let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
    set_fso(&mut data, FSO_LEN as u16);
    data
}

/// The initial contents of page 1: a fresh open mark, close mark zeroed.
/// The marks disagree until a clean shutdown copies one onto the other.
pub(crate) fn first_init() -> Box<[u8]> {
    let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
    data[OPEN_MARK].copy_from_slice(&rand::random::<u64>().to_le_bytes());
    data
}

/// Stamps a fresh random open mark on page 1.
pub(crate) fn stamp_open_mark(page: &Page) {
    let mut buf = page.lock();
    let token = rand::random::<u64>().to_le_bytes();
    buf.data[OPEN_MARK].copy_from_slice(&token);
    buf.dirty = true;
}

/// Copies the open mark onto the close mark: the clean-shutdown witness.
pub(crate) fn stamp_close_mark(page: &Page) {
    let mut buf = page.lock();
    let token: [u8; 8] = buf.data[OPEN_MARK].try_into().unwrap();
    buf.data[CLOSE_MARK].copy_from_slice(&token);
    buf.dirty = true;
}

/// Whether page 1 witnesses a clean shutdown.
pub(crate) fn is_clean(page: &Page) -> bool {
    let buf = page.lock();
    buf.data[OPEN_MARK] == buf.data[CLOSE_MARK]
}

struct PageStore {
    file: File,
    /// Number of pages in the data file; the next new page is `tail + 1`.
    tail: AtomicU32,
}

impl PageStore {
    fn write_back(&self, page: &Page, force_clean: bool) {
        let mut buf = page.lock();
        if !buf.dirty && !force_clean {
            return;
        }
        let offset = (page.pgno as u64 - 1) * PAGE_SIZE as u64;
        let res = fio::write_at(&self.file, &buf.data, offset).and_then(|()| self.file.sync_data());
        if let Err(e) = res {
            panic!("failed to write back page {}: {e}", page.pgno);
        }
        buf.dirty = false;
    }
}

impl Store for PageStore {
    type Key = Pgno;
    type Entry = Page;

    fn load(&self, pgno: Pgno) -> Result<Page> {
        let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        fio::read_at(&self.file, &mut data, (pgno as u64 - 1) * PAGE_SIZE as u64)?;
        Ok(Page::new(pgno, data))
    }

    fn unload(&self, _pgno: Pgno, page: &Page) {
        self.write_back(page, false);
    }
}

/// The bounded page pool over the data file.
#[derive(Clone)]
pub struct PagePool {
    cache: Arc<RefCache<PageStore>>,
}

impl PagePool {
    pub fn create(path: &Path, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        Self::new(file, 0, capacity)
    }

    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        let pages = (file.metadata()?.len() / PAGE_SIZE as u64) as Pgno;
        Self::new(file, pages, capacity)
    }

    fn new(file: File, pages: Pgno, capacity: usize) -> Result<Self> {
        if capacity < MIN_POOL_PAGES {
            return Err(Error::MemTooSmall(capacity));
        }
        Ok(PagePool {
            cache: Arc::new(RefCache::new(
                PageStore {
                    file,
                    tail: AtomicU32::new(pages),
                },
                capacity,
            )),
        })
    }

    /// Allocates a new page at the tail, writing `init` through to disk.
    /// The cache is not populated.
    pub fn new_page(&self, init: &[u8]) -> Result<Pgno> {
        assert_eq!(init.len(), PAGE_SIZE);
        let store = &self.cache.store;
        let pgno = store.tail.fetch_add(1, Ordering::SeqCst) + 1;
        fio::write_at(&store.file, init, (pgno as u64 - 1) * PAGE_SIZE as u64)?;
        store.file.sync_data()?;
        Ok(pgno)
    }

    /// Returns a pinned handle, faulting the page in if absent.
    pub fn get(&self, pgno: Pgno) -> Result<PageRef> {
        let page = self.cache.get(pgno)?;
        Ok(PageRef {
            page,
            cache: self.cache.clone(),
        })
    }

    /// Writes the page through to disk regardless of its dirty bit.
    pub fn flush_page(&self, page: &Page) {
        self.cache.store.write_back(page, true);
    }

    /// Number of pages currently in the data file.
    pub fn page_count(&self) -> Pgno {
        self.cache.store.tail.load(Ordering::SeqCst)
    }

    /// Truncates the data file to `max_pgno` pages and resets the tail.
    /// Only used during recovery, before the cache is populated.
    pub fn truncate_to(&self, max_pgno: Pgno) -> Result<()> {
        let store = &self.cache.store;
        store.file.set_len(max_pgno as u64 * PAGE_SIZE as u64)?;
        store.tail.store(max_pgno, Ordering::SeqCst);
        info!("data file truncated to {max_pgno} pages");
        Ok(())
    }

    /// Flushes every resident page.
    pub fn close(&self) {
        self.cache.close();
    }
}

/// A pinned page handle; the pin is dropped (and a dirty page written back
/// on the last release) when the handle goes out of scope.
pub struct PageRef {
    page: Arc<Page>,
    cache: Arc<RefCache<PageStore>>,
}

impl Deref for PageRef {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.cache.release(self.page.pgno);
    }
}
