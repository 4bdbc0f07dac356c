use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::config::CACHE_RETRY_SLEEP_MS;
use super::error::{DbError, Result};

struct Slot<V> {
    value: Arc<V>,
    refs: usize,
}

struct State<V> {
    slots: HashMap<u64, Slot<V>>,
    /// Keys some thread is currently loading from the backing store.
    loading: HashSet<u64>,
}

/// Reference-counted cache keyed by u64.
///
/// A cached value stays resident while its reference count is positive;
/// the count is incremented by `get` and decremented by `release`. When it
/// drops to zero the value is evicted through the caller-supplied writeback
/// closure. There is no replacement policy: a full cache rejects new keys
/// with `CacheFull` until something is released.
///
/// Loading happens outside the cache mutex. A thread that finds the key
/// marked as loading sleeps briefly and retries rather than waiting on a
/// condition variable; contention on a single key is rare.
pub struct RefCache<V> {
    state: Mutex<State<V>>,
    /// Maximum number of resident-or-loading keys; 0 means unbounded.
    capacity: usize,
}

impl<V> RefCache<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                loading: HashSet::new(),
            }),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(0)
    }

    /// Fetches the value for `key`, loading it with `load` on a miss.
    pub fn get<L>(&self, key: u64, load: L) -> Result<Arc<V>>
    where
        L: FnOnce() -> Result<Arc<V>>,
    {
        loop {
            let mut state = self.state.lock();
            if state.loading.contains(&key) {
                drop(state);
                thread::sleep(Duration::from_millis(CACHE_RETRY_SLEEP_MS));
                continue;
            }
            if let Some(slot) = state.slots.get_mut(&key) {
                slot.refs += 1;
                return Ok(Arc::clone(&slot.value));
            }
            if self.capacity > 0 && state.slots.len() + state.loading.len() >= self.capacity {
                return Err(DbError::CacheFull);
            }
            state.loading.insert(key);
            break;
        }

        let loaded = load();

        let mut state = self.state.lock();
        state.loading.remove(&key);
        let value = loaded?;
        state.slots.insert(
            key,
            Slot {
                value: Arc::clone(&value),
                refs: 1,
            },
        );
        Ok(value)
    }

    /// Drops one reference to `key`. At zero the value leaves the cache and
    /// is handed to `evict` for writeback.
    pub fn release<E>(&self, key: u64, evict: E) -> Result<()>
    where
        E: FnOnce(Arc<V>) -> Result<()>,
    {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(&key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                let slot = state.slots.remove(&key).unwrap();
                evict(slot.value)?;
            }
        }
        Ok(())
    }

    /// Evicts every resident value regardless of reference count.
    pub fn close<E>(&self, mut evict: E) -> Result<()>
    where
        E: FnMut(Arc<V>) -> Result<()>,
    {
        let mut state = self.state.lock();
        for (_, slot) in state.slots.drain() {
            evict(slot.value)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn resident(&self) -> usize {
        self.state.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_loads_once() {
        let cache: RefCache<u32> = RefCache::unbounded();
        let loads = AtomicUsize::new(0);

        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(42u32))
        };
        let a = cache.get(1, load).unwrap();
        let b = cache
            .get(1, || panic!("second get must hit the cache"))
            .unwrap();

        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_evicts_at_zero() {
        let cache: RefCache<u32> = RefCache::unbounded();
        cache.get(1, || Ok(Arc::new(7))).unwrap();
        cache.get(1, || unreachable!()).unwrap();

        let evictions = AtomicUsize::new(0);
        cache
            .release(1, |_| {
                evictions.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        assert_eq!(cache.resident(), 1);

        cache
            .release(1, |_| {
                evictions.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resident(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let cache: RefCache<u32> = RefCache::with_capacity(2);
        cache.get(1, || Ok(Arc::new(1))).unwrap();
        cache.get(2, || Ok(Arc::new(2))).unwrap();

        assert!(matches!(
            cache.get(3, || Ok(Arc::new(3))),
            Err(DbError::CacheFull)
        ));

        // Releasing a key frees a slot for a new one.
        cache.release(1, |_| Ok(())).unwrap();
        assert!(cache.get(3, || Ok(Arc::new(3))).is_ok());
    }

    #[test]
    fn test_failed_load_caches_nothing() {
        let cache: RefCache<u32> = RefCache::with_capacity(2);
        let res = cache.get(1, || Err(DbError::NullEntry));
        assert!(matches!(res, Err(DbError::NullEntry)));
        assert_eq!(cache.resident(), 0);

        // The key is loadable again afterwards.
        assert!(cache.get(1, || Ok(Arc::new(9))).is_ok());
    }
}
