//! Keyed build-once map.
//!
//! Backs the class-map and accessor caches. Each key owns its own slot, so
//! constructing one value never blocks lookups or construction of another
//! key; concurrent first access to the same key runs the builder once.

use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;

struct Slot<V: ?Sized> {
    value: OnceLock<Arc<V>>,
    init: Mutex<()>,
}

impl<V: ?Sized> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
        }
    }
}

/// A concurrent map whose values are built at most once per key.
pub(crate) struct OnceMap<K, V: ?Sized> {
    slots: DashMap<K, Arc<Slot<V>>>,
}

impl<K, V> OnceMap<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Return the value for `key`, running `build` if no value exists yet.
    ///
    /// A failed build leaves the slot empty so a later caller can retry.
    pub(crate) fn get_or_try_init<E, F>(&self, key: K, build: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        // The shard lock is released once the slot Arc is cloned out.
        let slot = Arc::clone(&self.slots.entry(key).or_default());

        if let Some(value) = slot.value.get() {
            return Ok(Arc::clone(value));
        }

        let _guard = slot.init.lock();
        if let Some(value) = slot.value.get() {
            return Ok(Arc::clone(value));
        }

        let value = build()?;
        // Cannot fail: we hold the slot's init lock and saw it empty.
        let _ = slot.value.set(Arc::clone(&value));
        Ok(value)
    }

    /// Return the value for `key` if it was built.
    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.slots
            .get(key)
            .and_then(|slot| slot.value.get().map(Arc::clone))
    }

    /// True if a value was built for `key`.
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of built values.
    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value.get().is_some())
            .count()
    }

    /// Drop every slot.
    pub(crate) fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_builds_once() {
        let map: OnceMap<&str, String> = OnceMap::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = map
                .get_or_try_init::<(), _>("a", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new("built".to_string()))
                })
                .unwrap();
            assert_eq!(value.as_str(), "built");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_failed_build_can_retry() {
        let map: OnceMap<u32, u32> = OnceMap::new();

        let err = map.get_or_try_init(1, || Err("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(!map.contains(&1));

        let ok = map.get_or_try_init::<&str, _>(1, || Ok(Arc::new(7))).unwrap();
        assert_eq!(*ok, 7);
        assert_eq!(map.get(&1).as_deref(), Some(&7));
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let map: OnceMap<u32, u32> = OnceMap::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(100);

        let results: Vec<Arc<u32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        map.get_or_try_init::<(), _>(42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(Arc::new(99))
                        })
                        .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }
}
