// ── Generic reactive entity collection ──
//
// Lock-free concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels. Generalized from a single
// entity-id-keyed collection into a generic `K -> T` map so the same
// primitive backs devices, parameters, operations, transfers and
// subscriptions without one bespoke collection type per entity.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A lock-free, reactive collection for a single entity type keyed by
/// `K`. Every mutation bumps a version counter and rebuilds the
/// snapshot that subscribers receive.
pub(crate) struct EntityCollection<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self { by_key: DashMap::new(), version, snapshot }
    }

    /// Insert or update an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, entity: T) -> bool {
        let is_new = !self.by_key.contains_key(&key);
        self.by_key.insert(key, Arc::new(entity));
        self.rebuild_snapshot();
        self.bump_version();
        is_new
    }

    /// Insert only if `key` is absent; returns `false` without writing
    /// if it's already present. Used by `register()` for §8's identity
    /// invariant: a collision must be rejected, not overwritten.
    pub(crate) fn insert_if_absent(&self, key: K, entity: T) -> bool {
        if self.by_key.contains_key(&key) {
            return false;
        }
        self.by_key.insert(key, Arc::new(entity));
        self.rebuild_snapshot();
        self.bump_version();
        true
    }

    /// Mutate an existing entry in place via `f`, returning `true` if
    /// the key existed. Bumps the version/snapshot regardless of
    /// whether `f` actually changed anything -- callers are expected to
    /// only call this when they intend a write.
    pub(crate) fn update<F: FnOnce(&mut T)>(&self, key: &K, f: F) -> bool {
        let Some(mut entry) = self.by_key.get_mut(key) else { return false };
        let inner = Arc::make_mut(&mut entry);
        f(inner);
        drop(entry);
        self.rebuild_snapshot();
        self.bump_version();
        true
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_version();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<T>> = self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_returns_true_for_new_key() {
        let col: EntityCollection<String, String> = EntityCollection::new();
        assert!(col.upsert("k1".into(), "hello".into()));
    }

    #[test]
    fn upsert_returns_false_for_existing_key() {
        let col: EntityCollection<String, String> = EntityCollection::new();
        col.upsert("k1".into(), "hello".into());
        assert!(!col.upsert("k1".into(), "world".into()));
    }

    #[test]
    fn insert_if_absent_rejects_duplicates() {
        let col: EntityCollection<String, String> = EntityCollection::new();
        assert!(col.insert_if_absent("k1".into(), "hello".into()));
        assert!(!col.insert_if_absent("k1".into(), "world".into()));
        assert_eq!(*col.get(&"k1".to_string()).unwrap(), "hello");
    }

    #[test]
    fn remove_cleans_up() {
        let col: EntityCollection<String, String> = EntityCollection::new();
        col.upsert("k1".into(), "hello".into());
        assert_eq!(*col.remove(&"k1".to_string()).unwrap(), "hello");
        assert!(col.get(&"k1".to_string()).is_none());
        assert!(col.is_empty());
    }

    #[test]
    fn snapshot_reflects_current_state() {
        let col: EntityCollection<String, String> = EntityCollection::new();
        col.upsert("a".into(), "x".into());
        col.upsert("b".into(), "y".into());
        assert_eq!(col.snapshot().len(), 2);
    }

    #[test]
    fn update_mutates_existing_value() {
        let col: EntityCollection<String, i32> = EntityCollection::new();
        col.upsert("k".into(), 1);
        assert!(col.update(&"k".to_string(), |v| *v += 41));
        assert_eq!(*col.get(&"k".to_string()).unwrap(), 42);
    }

    #[test]
    fn update_on_missing_key_is_noop() {
        let col: EntityCollection<String, i32> = EntityCollection::new();
        assert!(!col.update(&"missing".to_string(), |v| *v += 1));
    }
}
