//! Append-only write-ahead log.
//!
//! File layout: `[xchecksum(4)] [record]*`, each record
//! `[size(4) | checksum(4) | body(size)]`, all little-endian. The
//! per-record checksum is a Horner-style rolling hash over the body; the
//! whole-log `xchecksum` folds the full wrapped bytes of every record in
//! file order. Every successful append recomputes `xchecksum`, rewrites the
//! header and fsyncs, so the log's self-consistency witness is durable
//! before any page write acknowledges the caller.

use std::fs::{File, OpenOptions};
use std::path::Path;

use log::{info, warn};
use parking_lot::Mutex;

use crate::error::{open_error, Error, Result};
use crate::fio;

const HEADER_LEN: u64 = 4;
const REC_HEADER_LEN: u64 = 8;
const SEED: u32 = 13331;

/// Folds `bytes` into a running Horner hash.
pub(crate) fn fold(mut check: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        check = check.wrapping_mul(SEED).wrapping_add(b as u32);
    }
    check
}

/// Frames a body as `[size | checksum | body]`.
fn wrap_record(body: &[u8]) -> Vec<u8> {
    let mut wrapped = Vec::with_capacity(REC_HEADER_LEN as usize + body.len());
    wrapped.extend_from_slice(&(body.len() as u32).to_le_bytes());
    wrapped.extend_from_slice(&fold(0, body).to_le_bytes());
    wrapped.extend_from_slice(body);
    wrapped
}

pub struct Wal {
    inner: Mutex<WalInner>,
}

struct WalInner {
    file: File,
    /// Length of the valid prefix of the file.
    size: u64,
    xchecksum: u32,
}

impl Wal {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        fio::write_at(&file, &0u32.to_le_bytes(), 0)?;
        file.sync_data()?;
        Ok(Wal {
            inner: Mutex::new(WalInner {
                file,
                size: HEADER_LEN,
                xchecksum: 0,
            }),
        })
    }

    /// Opens an existing log, verifying it end to end.
    ///
    /// Iteration stops at the first record whose size or checksum does not
    /// validate; anything past that point is a torn tail and is truncated.
    /// If the recomputed `xchecksum` disagrees with the stored header, the
    /// header is rewritten with the recomputed value. A file shorter than
    /// its own header is `BadLogFile` and fatal.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN {
            return Err(Error::BadLogFile);
        }
        let mut hdr = [0u8; 4];
        fio::read_at(&file, &mut hdr, 0)?;
        let stored = u32::from_le_bytes(hdr);

        let wal = Wal {
            inner: Mutex::new(WalInner {
                file,
                size: file_len,
                xchecksum: stored,
            }),
        };

        let (pos, recomputed) = wal.scan()?;
        if pos < file_len || recomputed != stored {
            let mut w = wal.inner.lock();
            warn!(
                "log has a torn tail: truncating {} -> {} bytes",
                file_len, pos
            );
            w.file.set_len(pos)?;
            fio::write_at(&w.file, &recomputed.to_le_bytes(), 0)?;
            w.file.sync_data()?;
            w.size = pos;
            w.xchecksum = recomputed;
        }
        Ok(wal)
    }

    /// Walks the valid record prefix, returning its end position and the
    /// checksum folded over it.
    fn scan(&self) -> Result<(u64, u32)> {
        let mut recomputed = 0u32;
        let mut pos = HEADER_LEN;
        let mut iter = self.iter();
        while let Some(body) = iter.next().transpose()? {
            recomputed = fold(recomputed, &wrap_record(&body));
            pos = iter.pos;
        }
        Ok((pos, recomputed))
    }

    /// Appends one record and makes it durable.
    ///
    /// I/O failure here leaves the log in an undefined state and is fatal:
    /// continuing would let page writes overtake their log records.
    pub fn append(&self, body: &[u8]) {
        let mut w = self.inner.lock();
        let wrapped = wrap_record(body);
        let checksum = fold(w.xchecksum, &wrapped);
        let res = fio::write_at(&w.file, &wrapped, w.size)
            .and_then(|()| fio::write_at(&w.file, &checksum.to_le_bytes(), 0))
            .and_then(|()| w.file.sync_data());
        if let Err(e) = res {
            panic!("failed to append to log: {e}");
        }
        w.size += wrapped.len() as u64;
        w.xchecksum = checksum;
    }

    /// A cursor over record bodies in file order. A record that fails to
    /// validate ends iteration; it is indistinguishable from EOF.
    pub fn iter(&self) -> Records<'_> {
        Records {
            wal: self,
            pos: HEADER_LEN,
        }
    }

    /// Sets the file length, then rewrites the header to match whatever
    /// record prefix survives the cut.
    pub fn truncate(&self, len: u64) -> Result<()> {
        {
            let mut w = self.inner.lock();
            w.file.set_len(len.max(HEADER_LEN))?;
            w.size = len.max(HEADER_LEN);
        }
        let (pos, recomputed) = self.scan()?;
        let mut w = self.inner.lock();
        w.file.set_len(pos)?;
        fio::write_at(&w.file, &recomputed.to_le_bytes(), 0)?;
        w.file.sync_data()?;
        w.size = pos;
        w.xchecksum = recomputed;
        Ok(())
    }

    pub fn close(&self) {
        let w = self.inner.lock();
        if let Err(e) = w.file.sync_data() {
            panic!("failed to sync log: {e}");
        }
        info!("log closed at {} bytes", w.size);
    }
}

/// Iterator created by [`Wal::iter`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Records<'a> {
    wal: &'a Wal,
    pos: u64,
}

impl Iterator for Records<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let w = self.wal.inner.lock();
        if self.pos + REC_HEADER_LEN > w.size {
            return None;
        }
        let mut hdr = [0u8; 8];
        if let Err(e) = fio::read_at(&w.file, &mut hdr, self.pos) {
            return Some(Err(e.into()));
        }
        let size = u32::from_le_bytes(hdr[..4].try_into().unwrap()) as u64;
        let checksum = u32::from_le_bytes(hdr[4..].try_into().unwrap());
        if self.pos + REC_HEADER_LEN + size > w.size {
            return None;
        }
        let mut body = vec![0u8; size as usize];
        if let Err(e) = fio::read_at(&w.file, &mut body, self.pos + REC_HEADER_LEN) {
            return Some(Err(e.into()));
        }
        if fold(0, &body) != checksum {
            return None;
        }
        self.pos += REC_HEADER_LEN + size;
        Some(Ok(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn log_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("test.log")
    }

    fn collect(wal: &Wal) -> Vec<Vec<u8>> {
        wal.iter().map(Result::unwrap).collect()
    }

    #[test]
    fn append_iterate_roundtrip() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::create(&log_path(&dir)).unwrap();
        let bodies: Vec<Vec<u8>> = vec![b"one".to_vec(), b"two".to_vec(), vec![], vec![0xff; 100]];
        for body in &bodies {
            wal.append(body);
        }
        assert_eq!(collect(&wal), bodies);
    }

    #[test]
    fn reopen_preserves_records_and_checksum() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"alpha");
            wal.append(b"beta");
            wal.close();
        }
        let wal = Wal::open(&path).unwrap();
        assert_eq!(collect(&wal), vec![b"alpha".to_vec(), b"beta".to_vec()]);
        // A verified log reopens byte-identically.
        let len = fs::metadata(&path).unwrap().len();
        drop(wal);
        let wal = Wal::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        wal.append(b"gamma");
        assert_eq!(collect(&wal).len(), 3);
    }

    #[test]
    fn torn_tail_is_truncated_to_last_good_record() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let good_len;
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"keep me");
            good_len = fs::metadata(&path).unwrap().len();
            wal.append(b"lose me");
        }
        // Corrupt one byte inside the last record's body.
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, &data).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert_eq!(collect(&wal), vec![b"keep me".to_vec()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);

        // The rewritten header matches the surviving prefix.
        drop(wal);
        let wal = Wal::open(&path).unwrap();
        assert_eq!(collect(&wal), vec![b"keep me".to_vec()]);
    }

    #[test]
    fn trailing_garbage_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        {
            let wal = Wal::create(&path).unwrap();
            wal.append(b"solid");
        }
        let mut data = fs::read(&path).unwrap();
        let good_len = data.len() as u64;
        // A half-written record header at EOF.
        data.extend_from_slice(&[0x10, 0x00, 0x00]);
        fs::write(&path, &data).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert_eq!(collect(&wal), vec![b"solid".to_vec()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn truncate_keeps_a_consistent_header() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let wal = Wal::create(&path).unwrap();
        for body in [b"aa", b"bb", b"cc"] {
            wal.append(body);
        }
        // Cut into the middle of the second record.
        wal.truncate(20).unwrap();
        assert_eq!(collect(&wal), vec![b"aa".to_vec()]);

        // The log stays appendable and reopens clean.
        wal.append(b"dd");
        wal.close();
        drop(wal);
        let wal = Wal::open(&path).unwrap();
        assert_eq!(collect(&wal), vec![b"aa".to_vec(), b"dd".to_vec()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), 4 + 2 * 10);
    }

    #[test]
    fn short_file_is_bad_log_file() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        fs::write(&path, [0u8; 2]).unwrap();
        assert!(matches!(Wal::open(&path), Err(Error::BadLogFile)));
    }

    proptest! {
        #[test]
        fn arbitrary_bodies_roundtrip(bodies in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..200), 1..20,
        )) {
            let dir = TempDir::new().unwrap();
            let path = log_path(&dir);
            {
                let wal = Wal::create(&path).unwrap();
                for body in &bodies {
                    wal.append(body);
                }
                wal.close();
            }
            let wal = Wal::open(&path).unwrap();
            prop_assert_eq!(collect(&wal), bodies);
        }

        #[test]
        fn crash_at_any_byte_recovers_a_prefix(cut in 4u64..200) {
            let dir = TempDir::new().unwrap();
            let path = log_path(&dir);
            let bodies: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; 13]).collect();
            {
                let wal = Wal::create(&path).unwrap();
                for body in &bodies {
                    wal.append(body);
                }
            }
            let data = fs::read(&path).unwrap();
            let cut = (cut as usize).min(data.len());
            fs::write(&path, &data[..cut]).unwrap();

            let wal = Wal::open(&path).unwrap();
            let survived = collect(&wal);
            prop_assert!(survived.len() <= bodies.len());
            prop_assert_eq!(&bodies[..survived.len()], &survived[..]);
        }
    }
}
