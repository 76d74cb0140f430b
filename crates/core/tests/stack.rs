//! End-to-end tests over the whole engine stack: TM + DM + VM + B+-tree,
//! including restarts and crash recovery.

use std::sync::Arc;

use shaledb_core::btree::BTree;
use shaledb_core::dm::DataManager;
use shaledb_core::paths::DbBase;
use shaledb_core::tm::TxnManager;
use shaledb_core::vm::{IsolationLevel, VersionManager};
use shaledb_core::{Uid, PAGE_SIZE};
use tempfile::TempDir;

const MEM: u64 = 256 * PAGE_SIZE as u64;

fn enable_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create(base: &DbBase) -> Arc<VersionManager> {
    enable_logging();
    let tm = Arc::new(TxnManager::create(&base.xid()).unwrap());
    let dm = Arc::new(DataManager::create(base, MEM, &tm).unwrap());
    Arc::new(VersionManager::new(tm, dm))
}

fn open(base: &DbBase) -> Arc<VersionManager> {
    let tm = Arc::new(TxnManager::open(&base.xid()).unwrap());
    let dm = Arc::new(DataManager::open(base, MEM, &tm).unwrap());
    Arc::new(VersionManager::new(tm, dm))
}

#[test]
fn indexed_rows_survive_restart() {
    let dir = TempDir::new().unwrap();
    let base = DbBase::new(dir.path().join("db"));

    let boot;
    {
        let vm = create(&base);
        boot = BTree::create(vm.dm()).unwrap();
        let tree = BTree::load(vm.dm().clone(), boot).unwrap();

        let xid = vm.begin(IsolationLevel::ReadCommitted);
        for key in 0..100i64 {
            let uid = vm.insert(xid, format!("row-{key}").as_bytes()).unwrap();
            tree.insert(key, uid).unwrap();
        }
        vm.commit(xid).unwrap();
        drop(tree);
        vm.dm().close();
    }

    let vm = open(&base);
    let tree = BTree::load(vm.dm().clone(), boot).unwrap();
    let xid = vm.begin(IsolationLevel::ReadCommitted);
    let uids = tree.search_range(0, 99).unwrap();
    assert_eq!(uids.len(), 100);
    for (key, uid) in uids.iter().enumerate() {
        let row = vm.read(xid, *uid).unwrap().expect("row visible");
        assert_eq!(row, format!("row-{key}").into_bytes());
    }
    vm.commit(xid).unwrap();
    vm.dm().close();
}

#[test]
fn crash_rolls_back_in_flight_transactions_but_not_committed_ones() {
    let dir = TempDir::new().unwrap();
    let base = DbBase::new(dir.path().join("db"));

    let (kept, lost) = {
        let vm = create(&base);

        let committed = vm.begin(IsolationLevel::ReadCommitted);
        let kept = vm.insert(committed, b"committed row").unwrap();
        vm.commit(committed).unwrap();

        let in_flight = vm.begin(IsolationLevel::ReadCommitted);
        let lost = vm.insert(in_flight, b"in-flight row").unwrap();

        // Crash: the data manager is dropped without a clean close.
        (kept, lost)
    };

    let vm = open(&base);
    let xid = vm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(vm.read(xid, kept).unwrap(), Some(b"committed row".to_vec()));
    assert_eq!(vm.read(xid, lost).unwrap(), None);
    // The in-flight transaction was aborted by recovery.
    assert!(vm.tm().is_aborted(2));
    vm.commit(xid).unwrap();
    vm.dm().close();
}

#[test]
fn crash_rolls_back_uncommitted_deletes() {
    let dir = TempDir::new().unwrap();
    let base = DbBase::new(dir.path().join("db"));

    let uid = {
        let vm = create(&base);
        let writer = vm.begin(IsolationLevel::ReadCommitted);
        let uid = vm.insert(writer, b"still here").unwrap();
        vm.commit(writer).unwrap();

        let deleter = vm.begin(IsolationLevel::ReadCommitted);
        assert!(vm.delete(deleter, uid).unwrap());
        // Crash before the delete commits.
        uid
    };

    let vm = open(&base);
    let xid = vm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(vm.read(xid, uid).unwrap(), Some(b"still here".to_vec()));
    vm.commit(xid).unwrap();
    vm.dm().close();
}

#[test]
fn tree_under_transactional_churn() {
    let dir = TempDir::new().unwrap();
    let base = DbBase::new(dir.path().join("db"));
    let vm = create(&base);
    let boot = BTree::create(vm.dm()).unwrap();
    let tree = BTree::load(vm.dm().clone(), boot).unwrap();

    // Interleave committed and aborted writers over the same key space.
    let mut expect_visible: Vec<(i64, Uid)> = Vec::new();
    for round in 0..10i64 {
        let xid = vm.begin(IsolationLevel::ReadCommitted);
        let mut batch = Vec::new();
        for i in 0..20 {
            let key = round * 20 + i;
            let uid = vm.insert(xid, key.to_le_bytes().as_slice()).unwrap();
            tree.insert(key, uid).unwrap();
            batch.push((key, uid));
        }
        if round % 2 == 0 {
            vm.commit(xid).unwrap();
            expect_visible.extend(batch);
        } else {
            vm.abort(xid);
        }
    }

    // Aborted rows stay in the tree but are invisible through the VM.
    let reader = vm.begin(IsolationLevel::ReadCommitted);
    let all = tree.search_range(i64::MIN, i64::MAX).unwrap();
    assert_eq!(all.len(), 200);
    let mut visible = Vec::new();
    for uid in all {
        if let Some(row) = vm.read(reader, uid).unwrap() {
            let key = i64::from_le_bytes(row.try_into().unwrap());
            visible.push((key, uid));
        }
    }
    assert_eq!(visible, expect_visible);
    vm.commit(reader).unwrap();
    vm.dm().close();
}
