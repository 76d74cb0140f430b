//! Assembly of the full engine stack behind one handle.

use std::path::Path;
use std::sync::Arc;

use log::info;

use shaledb_core::dm::DataManager;
use shaledb_core::paths::DbBase;
use shaledb_core::tm::TxnManager;
use shaledb_core::vm::VersionManager;

use crate::catalog::TableManager;
use crate::error::Result;
use crate::exec::Session;

pub struct Database {
    vm: Arc<VersionManager>,
    tbm: Arc<TableManager>,
}

impl Database {
    /// Initialises a new database at `<path>.db/.log/.xid/.bt`.
    pub fn create(path: &Path, mem: u64) -> Result<Database> {
        let base = DbBase::new(path);
        let tm = Arc::new(TxnManager::create(&base.xid())?);
        let dm = Arc::new(DataManager::create(&base, mem, &tm)?);
        let vm = Arc::new(VersionManager::new(tm, dm));
        let tbm = Arc::new(TableManager::create(&base, vm.clone())?);
        info!("created database at {}", path.display());
        Ok(Database { vm, tbm })
    }

    /// Opens an existing database, recovering from an unclean shutdown if
    /// needed.
    pub fn open(path: &Path, mem: u64) -> Result<Database> {
        let base = DbBase::new(path);
        let tm = Arc::new(TxnManager::open(&base.xid())?);
        let dm = Arc::new(DataManager::open(&base, mem, &tm)?);
        let vm = Arc::new(VersionManager::new(tm, dm));
        let tbm = Arc::new(TableManager::open(&base, vm.clone())?);
        info!("opened database at {}", path.display());
        Ok(Database { vm, tbm })
    }

    pub fn session(&self) -> Session {
        Session::new(self.tbm.clone())
    }

    /// Flushes everything and stamps the clean-shutdown witness.
    pub fn close(&self) {
        self.vm.dm().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlError;
    use pretty_assertions::assert_eq;
    use shaledb_core::PAGE_SIZE;
    use tempfile::TempDir;

    const MEM: u64 = 256 * PAGE_SIZE as u64;

    fn enable_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn exec(session: &mut Session, sql: &str) -> String {
        enable_logging();
        let out = session
            .execute(sql)
            .unwrap_or_else(|e| panic!("{sql:?} failed: {e}"));
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn create_insert_select() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut s = db.session();

        exec(
            &mut s,
            "create table users name string, age int32 (index name, age)",
        );
        exec(&mut s, "insert into users values 'sam', 22");
        exec(&mut s, "insert into users values 'kim', 35");

        assert_eq!(exec(&mut s, "select * from users where name = 'sam'"), "sam\t22");
        assert_eq!(exec(&mut s, "select age from users where name = 'kim'"), "35");
        assert_eq!(exec(&mut s, "select * from users where age > 50"), "");
        assert_eq!(
            exec(&mut s, "select name from users where age > 20 and age < 30"),
            "sam"
        );
        assert_eq!(exec(&mut s, "show"), "users (name string index, age int32 index)");
    }

    #[test]
    fn update_and_delete() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut s = db.session();
        exec(&mut s, "create table t k int64, v string (index k)");
        exec(&mut s, "insert into t values 1, 'one'");
        exec(&mut s, "insert into t values 2, 'two'");

        assert_eq!(exec(&mut s, "update t set v = 'uno' where k = 1"), "update 1");
        assert_eq!(exec(&mut s, "select v from t where k = 1"), "uno");

        assert_eq!(exec(&mut s, "delete from t where k = 1"), "delete 1");
        assert_eq!(exec(&mut s, "select * from t where k = 1"), "");
        assert_eq!(exec(&mut s, "select v from t where k = 2"), "two");
    }

    #[test]
    fn explicit_transactions_and_isolation() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut setup = db.session();
        exec(&mut setup, "create table t k int32, v string (index k)");

        // Repeatable read does not see rows committed by transactions that
        // were active at its begin.
        let mut rr = db.session();
        let mut writer = db.session();
        exec(&mut rr, "begin isolation level repeatable read");
        exec(&mut writer, "begin");
        exec(&mut writer, "insert into t values 5, 'a'");
        exec(&mut writer, "commit");
        assert_eq!(exec(&mut rr, "select * from t where k = 5"), "");
        exec(&mut rr, "commit");

        // A fresh session sees the row.
        let mut after = db.session();
        assert_eq!(exec(&mut after, "select v from t where k = 5"), "a");

        // Aborted work disappears.
        exec(&mut after, "begin");
        exec(&mut after, "insert into t values 9, 'gone'");
        exec(&mut after, "abort");
        assert_eq!(exec(&mut after, "select * from t where k = 9"), "");
    }

    #[test]
    fn transaction_statement_errors() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut s = db.session();

        assert!(matches!(
            s.execute("commit"),
            Err(SqlError::NoTransaction)
        ));
        exec(&mut s, "begin");
        assert!(matches!(
            s.execute("begin"),
            Err(SqlError::NestedTransaction)
        ));
        exec(&mut s, "commit");
    }

    #[test]
    fn catalog_errors() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut s = db.session();
        exec(&mut s, "create table t a int32, b string (index a)");

        assert!(matches!(
            s.execute("create table t a int32 (index a)"),
            Err(SqlError::TableDuplicated(_))
        ));
        assert!(matches!(
            s.execute("select * from missing"),
            Err(SqlError::TableNotFound(_))
        ));
        assert!(matches!(
            s.execute("select * from t where c = 1"),
            Err(SqlError::FieldNotFound(_))
        ));
        assert!(matches!(
            s.execute("select * from t where b = 'x'"),
            Err(SqlError::FieldNotIndexed(_))
        ));
        assert!(matches!(
            s.execute("create table u a int32 (index b)"),
            Err(SqlError::FieldNotFound(_))
        ));
        assert!(matches!(
            s.execute("insert into t values 1"),
            Err(SqlError::InvalidValues)
        ));
        assert!(matches!(
            s.execute("insert into t values 'one', 'x'"),
            Err(SqlError::InvalidValues)
        ));
    }

    #[test]
    fn drop_table_hides_it_and_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::create(&path, MEM).unwrap();
            let mut s = db.session();
            exec(&mut s, "create table keep k int32 (index k)");
            exec(&mut s, "create table toss k int32 (index k)");
            exec(&mut s, "insert into keep values 7");
            exec(&mut s, "drop table toss");
            assert!(matches!(
                s.execute("select * from toss"),
                Err(SqlError::TableNotFound(_))
            ));
            drop(s);
            db.close();
        }
        let db = Database::open(&path, MEM).unwrap();
        let mut s = db.session();
        assert_eq!(exec(&mut s, "show"), "keep (k int32 index)");
        assert_eq!(exec(&mut s, "select * from keep where k = 7"), "7");
        drop(s);
        db.close();
    }

    #[test]
    fn rows_survive_crash_recovery() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::create(&path, MEM).unwrap();
            let mut s = db.session();
            exec(&mut s, "create table t k int32, v string (index k)");
            exec(&mut s, "insert into t values 1, 'safe'");
            // An uncommitted insert rides into the crash.
            exec(&mut s, "begin");
            exec(&mut s, "insert into t values 2, 'doomed'");
            // No commit, no clean close: the database is simply dropped.
            std::mem::forget(s);
        }
        let db = Database::open(&path, MEM).unwrap();
        let mut s = db.session();
        assert_eq!(exec(&mut s, "select v from t where k = 1"), "safe");
        assert_eq!(exec(&mut s, "select * from t where k = 2"), "");
        drop(s);
        db.close();
    }

    #[test]
    fn or_clauses_union_two_ranges() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(&dir.path().join("db"), MEM).unwrap();
        let mut s = db.session();
        exec(&mut s, "create table t k int32 (index k)");
        for k in 1..=5 {
            exec(&mut s, &format!("insert into t values {k}"));
        }
        assert_eq!(
            exec(&mut s, "select * from t where k < 2 or k > 4"),
            "1\n5"
        );
    }
}
