//! Concurrent, copy-on-split B+-tree over data items, keyed by 64-bit
//! signed integers. Values are uids; duplicate keys are permitted.
//!
//! The only mutable pointer in a tree is the root uid, held in a single
//! 8-byte "boot" data item and rewritten under the boot mutex when the
//! root splits. Node references are otherwise immutable: a reader holding
//! a stale node still reaches its target through the sibling chain, so
//! navigation takes only read locks and mutation releases node locks
//! between hops. All structural writes run under the super xid and are
//! therefore always visible.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::dm::{DataManager, ItemRef};
use crate::error::{Error, Result};
use crate::{Uid, SUPER_XID};

mod node;

use node::Node;

pub struct BTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    /// Pinned for the tree's lifetime; dropped on close.
    boot: ItemRef,
    boot_lock: Mutex<()>,
}

impl BTree {
    /// Creates an empty tree: one leaf plus the boot item pointing at it.
    /// Returns the boot uid, the tree's persistent identity.
    pub fn create(dm: &Arc<DataManager>) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &Node::empty_leaf().encode())?;
        let boot_uid = dm.insert(SUPER_XID, &root.raw().to_le_bytes())?;
        debug!("created tree: boot {boot_uid:?} root {root:?}");
        Ok(boot_uid)
    }

    pub fn load(dm: Arc<DataManager>, boot_uid: Uid) -> Result<BTree> {
        let boot = dm.read(boot_uid)?.ok_or(Error::NullEntry)?;
        Ok(BTree {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    fn root_uid(&self) -> Uid {
        let _g = self.boot_lock.lock();
        let raw = self.boot.read();
        Uid(u64::from_le_bytes(raw[..8].try_into().expect("boot item is 8 bytes")))
    }

    /// Replaces the root with a fresh internal node over `(left, right)`.
    fn update_root(&self, left: Uid, right: Uid, right_key: i64) -> Result<()> {
        let _g = self.boot_lock.lock();
        let new_root = self
            .dm
            .insert(SUPER_XID, &Node::new_root(left, right, right_key).encode())?;
        let mut w = self.boot.before();
        w.set_payload(&new_root.raw().to_le_bytes());
        w.log(SUPER_XID);
        debug!("root split: {left:?} + {right:?} -> {new_root:?}");
        Ok(())
    }

    fn load_node(&self, uid: Uid) -> Result<Node> {
        let item = self.dm.read(uid)?.ok_or(Error::NullEntry)?;
        Ok(Node::parse(&item.read()))
    }

    /// Descends to the leaf where `key` would live, retrying on siblings
    /// past concurrent splits.
    fn search_leaf(&self, key: i64) -> Result<Uid> {
        let mut cur = self.root_uid();
        loop {
            let node = self.load_node(cur)?;
            if node.leaf {
                return Ok(cur);
            }
            cur = match node.child_for(key) {
                Some(child) => child,
                None if !node.sibling.is_null() => node.sibling,
                None => return Err(Error::NullEntry),
            };
        }
    }

    /// Point lookup: every uid stored under `key`.
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Range lookup over `lo..=hi`, walking the leaf chain in key order.
    pub fn search_range(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let mut leaf_uid = self.search_leaf(lo)?;
        let mut out = Vec::new();
        loop {
            let leaf = self.load_node(leaf_uid)?;
            let mut past_hi = false;
            for &(son, key) in &leaf.entries {
                if key < lo {
                    continue;
                }
                if key > hi {
                    past_hi = true;
                    break;
                }
                out.push(Uid(son));
            }
            if past_hi || leaf.sibling.is_null() {
                return Ok(out);
            }
            leaf_uid = leaf.sibling;
        }
    }

    pub fn insert(&self, key: i64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        if let Some((new_node, new_key)) = self.insert_into(root, uid, key)? {
            self.update_root(root, new_node, new_key)?;
        }
        Ok(())
    }

    /// Inserts below `node_uid`, propagating a split upward as
    /// `(new node, its first key)`. Depth is logarithmic in the number of
    /// stored uids, so the recursion stays shallow.
    fn insert_into(&self, node_uid: Uid, uid: Uid, key: i64) -> Result<Option<(Uid, i64)>> {
        let node = self.load_node(node_uid)?;
        if node.leaf {
            return self.insert_and_split(node_uid, uid, key);
        }
        let child = {
            let mut cur = node_uid;
            loop {
                let n = self.load_node(cur)?;
                match n.child_for(key) {
                    Some(child) => break child,
                    None if !n.sibling.is_null() => cur = n.sibling,
                    None => return Err(Error::NullEntry),
                }
            }
        };
        match self.insert_into(child, uid, key)? {
            Some((split_off, split_key)) => self.insert_and_split(node_uid, split_off, split_key),
            None => Ok(None),
        }
    }

    /// The modifying hop: inserts `(son, key)` into the node, splitting if
    /// it fills up. Arriving at a node that concurrently split is detected
    /// by the key exceeding its maximum while a sibling exists; the insert
    /// then retries there.
    fn insert_and_split(&self, mut node_uid: Uid, son: Uid, key: i64) -> Result<Option<(Uid, i64)>> {
        loop {
            let item = self.dm.read(node_uid)?.ok_or(Error::NullEntry)?;
            let mut w = item.before();
            let mut node = Node::parse(&w.payload());

            if node.max_key().is_some_and(|max| key > max) && !node.sibling.is_null() {
                let sibling = node.sibling;
                w.rollback();
                node_uid = sibling;
                continue;
            }

            node.insert(son, key);
            let split = if node.needs_split() {
                let right = node.split();
                let right_key = right.entries[0].1;
                let right_uid = match self.dm.insert(SUPER_XID, &right.encode()) {
                    Ok(uid) => uid,
                    Err(e) => {
                        w.rollback();
                        return Err(e);
                    }
                };
                node.sibling = right_uid;
                Some((right_uid, right_key))
            } else {
                None
            };
            w.set_payload(&node.encode());
            w.log(SUPER_XID);
            return Ok(split);
        }
    }
}
