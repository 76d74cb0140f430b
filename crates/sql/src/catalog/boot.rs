//! The boot file: an 8-byte pointer to the newest table's metadata item,
//! rewritten atomically by writing `<base>.bt_tmp`, fsyncing it and
//! renaming it over the real file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};

use shaledb_core::paths::DbBase;
use shaledb_core::Uid;

use crate::error::Result;

pub(crate) struct Booter {
    base: DbBase,
}

impl Booter {
    pub fn create(base: &DbBase) -> Result<Booter> {
        remove_stale_tmp(base)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(base.bt())?;
        file.write_all(&Uid::NULL.raw().to_le_bytes())?;
        file.sync_data()?;
        Ok(Booter { base: base.clone() })
    }

    pub fn open(base: &DbBase) -> Result<Booter> {
        remove_stale_tmp(base)?;
        // Validate presence and size up front rather than on first use.
        let len = fs::metadata(base.bt())?.len();
        if len != 8 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "boot file is not 8 bytes").into());
        }
        Ok(Booter { base: base.clone() })
    }

    pub fn load(&self) -> Result<Uid> {
        let mut buf = [0u8; 8];
        File::open(self.base.bt())?.read_exact(&mut buf)?;
        Ok(Uid(u64::from_le_bytes(buf)))
    }

    pub fn update(&self, uid: Uid) -> Result<()> {
        let tmp = self.base.bt_tmp();
        {
            let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
            file.write_all(&uid.raw().to_le_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp, self.base.bt())?;
        Ok(())
    }
}

fn remove_stale_tmp(base: &DbBase) -> Result<()> {
    match fs::remove_file(base.bt_tmp()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
