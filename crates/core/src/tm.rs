//! Transaction manager: persistent assignment of xids and their state.
//!
//! The `.xid` file is an 8-byte little-endian count of issued xids followed
//! by one status byte per xid, indexed by `xid - 1`. Every status mutation
//! flushes the affected bytes before returning, so a committed xid's status
//! is durable when `commit` returns.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::{open_error, Error, Result};
use crate::{fio, Xid, SUPER_XID};

const HEADER_LEN: u64 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

impl TxnStatus {
    fn to_byte(self) -> u8 {
        match self {
            TxnStatus::Active => 0,
            TxnStatus::Committed => 1,
            TxnStatus::Aborted => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(TxnStatus::Active),
            1 => Ok(TxnStatus::Committed),
            2 => Ok(TxnStatus::Aborted),
            _ => Err(Error::BadXidFile),
        }
    }
}

pub struct TxnManager {
    inner: Mutex<TmFile>,
}

struct TmFile {
    file: File,
    /// Number of issued xids, kept in sync with the file length at all
    /// times: `file_len == HEADER_LEN + count`.
    count: u64,
}

impl TxnManager {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        fio::write_at(&file, &0u64.to_le_bytes(), 0)?;
        file.sync_data()?;
        Ok(TxnManager {
            inner: Mutex::new(TmFile { file, count: 0 }),
        })
    }

    /// Opens an existing xid file, validating that the header count matches
    /// the file length. A mismatch is `BadXidFile` and fatal.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(Error::BadXidFile);
        }
        let mut hdr = [0u8; 8];
        fio::read_at(&file, &mut hdr, 0)?;
        let count = u64::from_le_bytes(hdr);
        if HEADER_LEN + count != len {
            return Err(Error::BadXidFile);
        }
        Ok(TxnManager {
            inner: Mutex::new(TmFile { file, count }),
        })
    }

    /// Issues a new xid in the active state.
    ///
    /// The status byte is written before the header so that a torn write
    /// never yields a count exceeding the number of status bytes; any byte
    /// lost to a crash reads back as aborted.
    ///
    /// I/O failure on the xid file is fatal.
    pub fn begin(&self) -> Xid {
        let mut f = self.inner.lock();
        let xid = f.count + 1;
        let res = fio::write_at(&f.file, &[TxnStatus::Active.to_byte()], HEADER_LEN + xid - 1)
            .and_then(|()| fio::write_at(&f.file, &xid.to_le_bytes(), 0))
            .and_then(|()| f.file.sync_data());
        if let Err(e) = res {
            panic!("failed to write xid file: {e}");
        }
        f.count = xid;
        xid
    }

    pub fn commit(&self, xid: Xid) {
        self.set_status(xid, TxnStatus::Committed);
    }

    pub fn abort(&self, xid: Xid) {
        self.set_status(xid, TxnStatus::Aborted);
    }

    fn set_status(&self, xid: Xid, status: TxnStatus) {
        assert_ne!(xid, SUPER_XID, "the super xid has no mutable state");
        let f = self.inner.lock();
        assert!(xid <= f.count, "xid {xid} was never issued");
        let res = fio::write_at(&f.file, &[status.to_byte()], HEADER_LEN + xid - 1)
            .and_then(|()| f.file.sync_data());
        if let Err(e) = res {
            panic!("failed to write xid file: {e}");
        }
    }

    /// The status of `xid`. The super xid reads as committed; an xid beyond
    /// the issued count reads as aborted (a torn tail never committed).
    pub fn status(&self, xid: Xid) -> TxnStatus {
        if xid == SUPER_XID {
            return TxnStatus::Committed;
        }
        let f = self.inner.lock();
        if xid > f.count {
            return TxnStatus::Aborted;
        }
        let mut b = [0u8];
        if let Err(e) = fio::read_at(&f.file, &mut b, HEADER_LEN + xid - 1) {
            panic!("failed to read xid file: {e}");
        }
        match TxnStatus::from_byte(b[0]) {
            Ok(s) => s,
            Err(_) => panic!("corrupt status byte for xid {xid}"),
        }
    }

    pub fn is_active(&self, xid: Xid) -> bool {
        self.status(xid) == TxnStatus::Active
    }

    pub fn is_committed(&self, xid: Xid) -> bool {
        self.status(xid) == TxnStatus::Committed
    }

    pub fn is_aborted(&self, xid: Xid) -> bool {
        self.status(xid) == TxnStatus::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SUPER_XID;
    use std::fs;
    use tempfile::TempDir;

    fn xid_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("test.xid")
    }

    #[test]
    fn begin_is_monotonic_and_active() {
        let dir = TempDir::new().unwrap();
        let tm = TxnManager::create(&xid_path(&dir)).unwrap();
        for expected in 1..=10u64 {
            let xid = tm.begin();
            assert_eq!(xid, expected);
            assert!(tm.is_active(xid));
        }
    }

    #[test]
    fn status_transitions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = xid_path(&dir);
        {
            let tm = TxnManager::create(&path).unwrap();
            let a = tm.begin();
            let b = tm.begin();
            let c = tm.begin();
            tm.commit(a);
            tm.abort(b);
            assert!(tm.is_committed(a));
            assert!(tm.is_aborted(b));
            assert!(tm.is_active(c));
        }
        let tm = TxnManager::open(&path).unwrap();
        assert!(tm.is_committed(1));
        assert!(tm.is_aborted(2));
        assert!(tm.is_active(3));
        assert_eq!(tm.begin(), 4);
    }

    #[test]
    fn super_xid_is_always_committed() {
        let dir = TempDir::new().unwrap();
        let tm = TxnManager::create(&xid_path(&dir)).unwrap();
        assert!(tm.is_committed(SUPER_XID));
        assert!(!tm.is_active(SUPER_XID));
    }

    #[test]
    fn torn_tail_reads_as_aborted() {
        let dir = TempDir::new().unwrap();
        let tm = TxnManager::create(&xid_path(&dir)).unwrap();
        tm.begin();
        assert!(tm.is_aborted(999));
    }

    #[test]
    fn length_mismatch_is_bad_xid_file() {
        let dir = TempDir::new().unwrap();
        let path = xid_path(&dir);
        {
            let tm = TxnManager::create(&path).unwrap();
            tm.begin();
        }
        // Header claims one xid; chop off its status byte.
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..8]).unwrap();
        assert!(matches!(TxnManager::open(&path), Err(Error::BadXidFile)));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TxnManager::open(&xid_path(&dir)),
            Err(Error::FileNotExists(_))
        ));
    }
}
