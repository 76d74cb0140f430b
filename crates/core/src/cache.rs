//! Reference-counted cache framework, shared by the page pool and the data
//! item cache.
//!
//! Entries are resident exactly while pinned: `get` pins, the last release
//! evicts and writes the entry back through [`Store::unload`]. A key being
//! faulted in by one thread makes concurrent requesters wait instead of
//! issuing a duplicate load.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Backing store of a [`RefCache`].
pub(crate) trait Store {
    type Key: Copy + Eq + Hash;
    type Entry;

    /// Fault an entry in.
    fn load(&self, key: Self::Key) -> Result<Self::Entry>;

    /// Write an entry back when it leaves the cache.
    fn unload(&self, key: Self::Key, entry: &Self::Entry);
}

pub(crate) struct RefCache<S: Store> {
    pub(crate) store: S,
    capacity: usize,
    state: Mutex<State<S::Key, Arc<S::Entry>>>,
    loaded: Condvar,
}

struct State<K, V> {
    entries: HashMap<K, V>,
    pins: HashMap<K, usize>,
    loading: HashSet<K>,
}

impl<S: Store> RefCache<S> {
    pub fn new(store: S, capacity: usize) -> Self {
        RefCache {
            store,
            capacity,
            state: Mutex::new(State {
                entries: HashMap::new(),
                pins: HashMap::new(),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    /// Pins `key`, faulting it in from the store if absent.
    ///
    /// Fails with [`Error::CacheFull`] when the cache is at capacity; since
    /// entries leave on their last release, at capacity every resident entry
    /// is pinned and nothing is evictable.
    pub fn get(&self, key: S::Key) -> Result<Arc<S::Entry>> {
        let mut st = self.state.lock();
        loop {
            if st.loading.contains(&key) {
                self.loaded.wait(&mut st);
                continue;
            }
            if let Some(entry) = st.entries.get(&key) {
                let entry = entry.clone();
                *st.pins.get_mut(&key).expect("pinned entry has a count") += 1;
                return Ok(entry);
            }
            if st.entries.len() + st.loading.len() >= self.capacity {
                return Err(Error::CacheFull);
            }
            st.loading.insert(key);
            break;
        }
        drop(st);

        let loaded = self.store.load(key);

        let mut st = self.state.lock();
        st.loading.remove(&key);
        self.loaded.notify_all();
        match loaded {
            Ok(entry) => {
                let entry = Arc::new(entry);
                st.entries.insert(key, entry.clone());
                st.pins.insert(key, 1);
                Ok(entry)
            }
            Err(e) => Err(e),
        }
    }

    /// Drops one pin. On the last release the entry leaves the cache and is
    /// written back through [`Store::unload`].
    pub fn release(&self, key: S::Key) {
        let mut st = self.state.lock();
        let Some(pins) = st.pins.get_mut(&key) else {
            return;
        };
        *pins -= 1;
        if *pins > 0 {
            return;
        }
        st.pins.remove(&key);
        let entry = st.entries.remove(&key);
        drop(st);
        if let Some(entry) = entry {
            self.store.unload(key, &entry);
        }
    }

    /// Writes back every resident entry. Used at shutdown.
    pub fn close(&self) {
        let mut st = self.state.lock();
        let entries = std::mem::take(&mut st.entries);
        st.pins.clear();
        drop(st);
        for (key, entry) in entries {
            self.store.unload(key, &entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        loads: AtomicUsize,
        unloads: AtomicUsize,
    }

    impl Store for Counting {
        type Key = u32;
        type Entry = u32;

        fn load(&self, key: u32) -> Result<u32> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(key * 2)
        }

        fn unload(&self, _key: u32, _entry: &u32) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(capacity: usize) -> RefCache<Counting> {
        RefCache::new(
            Counting {
                loads: AtomicUsize::new(0),
                unloads: AtomicUsize::new(0),
            },
            capacity,
        )
    }

    #[test]
    fn pins_share_one_load() {
        let cache = counting(4);
        let a = cache.get(7).unwrap();
        let b = cache.get(7).unwrap();
        assert_eq!(*a, 14);
        assert_eq!(*b, 14);
        assert_eq!(cache.store.loads.load(Ordering::SeqCst), 1);

        cache.release(7);
        assert_eq!(cache.store.unloads.load(Ordering::SeqCst), 0);
        cache.release(7);
        assert_eq!(cache.store.unloads.load(Ordering::SeqCst), 1);

        // Re-faulted after full release.
        let _ = cache.get(7).unwrap();
        assert_eq!(cache.store.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn capacity_exhaustion_is_cache_full() {
        let cache = counting(2);
        let _a = cache.get(1).unwrap();
        let _b = cache.get(2).unwrap();
        assert!(matches!(cache.get(3), Err(Error::CacheFull)));
        cache.release(1);
        assert!(cache.get(3).is_ok());
    }
}
