//! Positional file I/O.
//!
//! All engine files are read and written at explicit offsets so that two
//! threads never interleave a seek on the same descriptor.

use std::fs::File;
use std::io;

#[cfg(target_family = "unix")]
use std::os::unix::fs::FileExt;
#[cfg(target_family = "windows")]
use std::os::windows::fs::FileExt;

pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    #[cfg(target_family = "unix")]
    {
        file.read_exact_at(buf, offset)
    }
    #[cfg(target_family = "windows")]
    {
        let mut pos = 0;
        while pos < buf.len() {
            let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            pos += n;
        }
        Ok(())
    }
}

pub(crate) fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    #[cfg(target_family = "unix")]
    {
        file.write_all_at(buf, offset)
    }
    #[cfg(target_family = "windows")]
    {
        let mut pos = 0;
        while pos < buf.len() {
            let n = file.seek_write(&buf[pos..], offset + pos as u64)?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            pos += n;
        }
        Ok(())
    }
}
