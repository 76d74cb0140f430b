//! Engine error kinds.
//!
//! Non-fatal kinds cross layer boundaries as typed values and are converted
//! to error frames at the wire layer. Fatal kinds (`BadLogFile`,
//! `BadXidFile`, the open-time file errors, `MemTooSmall`) terminate the
//! process at init; recovering from them is an operator concern.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The page pool is at capacity and every resident page is pinned.
    #[error("page cache is full")]
    CacheFull,

    /// The payload, once wrapped into item format, does not fit in a page.
    #[error("data of {0} bytes does not fit in a page")]
    DataTooLarge(usize),

    /// No page with enough free space could be obtained after repeated
    /// attempts; the caller may retry.
    #[error("database is busy")]
    DatabaseBusy,

    #[error("log file is corrupt")]
    BadLogFile,

    #[error("xid file is corrupt")]
    BadXidFile,

    #[error("database file already exists: {0}")]
    FileExists(PathBuf),

    #[error("database file not found: {0}")]
    FileNotExists(PathBuf),

    #[error("cannot read or write database file: {0}")]
    FileCannotRw(PathBuf),

    /// The configured memory budget is below the 10-page pool minimum.
    #[error("memory budget of {0} pages is below the 10-page minimum")]
    MemTooSmall(usize),

    /// The lock table observed a wait cycle closed by this request; the
    /// requesting transaction has been aborted.
    #[error("deadlock detected")]
    Deadlock,

    /// Another transaction deleted this version while the requester waited
    /// for its write lock.
    #[error("concurrent update to the same entry")]
    ConcurrentUpdate,

    /// A uid resolved to no live entry where one was required.
    #[error("entry does not exist")]
    NullEntry,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Maps open-time I/O failures onto the fatal file error kinds.
pub(crate) fn open_error(path: &std::path::Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotExists(path.to_owned()),
        io::ErrorKind::AlreadyExists => Error::FileExists(path.to_owned()),
        io::ErrorKind::PermissionDenied => Error::FileCannotRw(path.to_owned()),
        _ => Error::Io(e),
    }
}
