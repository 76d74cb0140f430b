//! Typed paths for the on-disk layout of a database.
//!
//! A database named `<base>` consists of `<base>.db` (paged heap),
//! `<base>.log` (WAL), `<base>.xid` (transaction states) and `<base>.bt`
//! (catalog boot pointer, updated through the transient `<base>.bt_tmp`).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The base path of a database, from which every engine file derives.
#[derive(Clone, Debug)]
pub struct DbBase(PathBuf);

impl DbBase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbBase(path.into())
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut s = OsString::from(self.0.as_os_str());
        s.push(suffix);
        PathBuf::from(s)
    }

    pub fn db(&self) -> PathBuf {
        self.with_suffix(".db")
    }

    pub fn log(&self) -> PathBuf {
        self.with_suffix(".log")
    }

    pub fn xid(&self) -> PathBuf {
        self.with_suffix(".xid")
    }

    pub fn bt(&self) -> PathBuf {
        self.with_suffix(".bt")
    }

    pub fn bt_tmp(&self) -> PathBuf {
        self.with_suffix(".bt_tmp")
    }
}

impl AsRef<Path> for DbBase {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
