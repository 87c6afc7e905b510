use std::{collections::HashMap, hash::Hash};

/// Index of a slot in an `LruMap` arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlotId(usize);

struct Slot<K, V> {
    key: K,
    value: V,
    /// Towards the most recently used end.
    newer: Option<SlotId>,
    /// Towards the least recently used end.
    older: Option<SlotId>,
}

/// A bounded map that evicts its least recently used entry.
///
/// Entries live in an arena of slots threaded onto a doubly-linked recency
/// list; the hash index maps keys to slots.  Freed slots are reused.
pub struct LruMap<K, V> {
    capacity: usize,
    index: HashMap<K, SlotId>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<SlotId>,
    newest: Option<SlotId>,
    oldest: Option<SlotId>,
}

impl<K: Clone + Eq + Hash, V> LruMap<K, V> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        LruMap {
            capacity: capacity.max(1),
            index: HashMap::new(),
            slots: vec![],
            free: vec![],
            newest: None,
            oldest: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn slot(&self, id: SlotId) -> &Slot<K, V> {
        match &self.slots[id.0] {
            Some(slot) => slot,
            None => unreachable!("indexed slot {:?} is free", id),
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot<K, V> {
        match &mut self.slots[id.0] {
            Some(slot) => slot,
            None => unreachable!("indexed slot {:?} is free", id),
        }
    }

    fn unlink(&mut self, id: SlotId) {
        let (newer, older) = {
            let slot = self.slot(id);
            (slot.newer, slot.older)
        };
        match newer {
            Some(n) => self.slot_mut(n).older = older,
            None => self.newest = older,
        }
        match older {
            Some(o) => self.slot_mut(o).newer = newer,
            None => self.oldest = newer,
        }
        let slot = self.slot_mut(id);
        slot.newer = None;
        slot.older = None;
    }

    fn push_newest(&mut self, id: SlotId) {
        let prev_newest = self.newest;
        {
            let slot = self.slot_mut(id);
            slot.older = prev_newest;
            slot.newer = None;
        }
        match prev_newest {
            Some(p) => self.slot_mut(p).newer = Some(id),
            None => self.oldest = Some(id),
        }
        self.newest = Some(id);
    }

    fn touch(&mut self, id: SlotId) {
        if self.newest != Some(id) {
            self.unlink(id);
            self.push_newest(id);
        }
    }

    /// Look up an entry and mark it as the most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let id = *self.index.get(key)?;
        self.touch(id);
        Some(&self.slot(id).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = *self.index.get(key)?;
        self.touch(id);
        Some(&mut self.slot_mut(id).value)
    }

    /// Look up an entry without affecting recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let id = *self.index.get(key)?;
        Some(&self.slot(id).value)
    }

    fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = *self.index.get(key)?;
        Some(&mut self.slot_mut(id).value)
    }

    /// Insert or replace an entry, making it the most recently used.  Returns
    /// the entry that had to be evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&id) = self.index.get(&key) {
            self.slot_mut(id).value = value;
            self.touch(id);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            value,
            newer: None,
            older: None,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id.0] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                SlotId(self.slots.len() - 1)
            }
        };
        self.index.insert(key, id);
        self.push_newest(id);
        evicted
    }

    fn take(&mut self, id: SlotId) -> (K, V) {
        self.unlink(id);
        self.free.push(id);
        match self.slots[id.0].take() {
            Some(slot) => {
                self.index.remove(&slot.key);
                (slot.key, slot.value)
            }
            None => unreachable!("indexed slot {:?} is free", id),
        }
    }

    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        let id = self.oldest?;
        Some(self.take(id))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let id = *self.index.get(key)?;
        Some(self.take(id).1)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.newest = None;
        self.oldest = None;
    }

    /// Keys from the most to the least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cur = self.newest;
        while let Some(id) = cur {
            let slot = self.slot(id);
            keys.push(slot.key.clone());
            cur = slot.older;
        }
        keys
    }

    /// Drop the entries `keep` rejects.  Survivors keep their recency order.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&V) -> bool,
    {
        for key in self.keys_by_recency() {
            if self.peek(&key).map_or(false, |value| !keep(value)) {
                self.remove(&key);
            }
        }
    }
}

/// Identifies a cached hierarchy level: the parent's identity plus, for
/// requests that customize the level (instance filter, size limit), a
/// fingerprint of those customizations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub primary: String,
    pub variation: Option<String>,
}

impl RequestKey {
    pub fn new(primary: String, variation: Option<String>) -> Self {
        RequestKey { primary, variation }
    }
}

struct PrimaryEntry<T> {
    value: Option<T>,
    variations: LruMap<String, T>,
}

/// Two-tier LRU cache: a bounded number of primary entries, each with a
/// bounded number of variations of its own.  Variations never satisfy
/// lookups for other variations or for the primary.
pub struct HierarchyCache<T> {
    variations_count: usize,
    primaries: LruMap<String, PrimaryEntry<T>>,
}

impl<T: Clone> HierarchyCache<T> {
    pub fn new(size: usize, variations_count: usize) -> Self {
        HierarchyCache {
            variations_count,
            primaries: LruMap::new(size),
        }
    }

    pub fn get(&mut self, key: &RequestKey) -> Option<T> {
        let entry = self.primaries.get_mut(&key.primary)?;
        match &key.variation {
            None => entry.value.clone(),
            Some(variation) => entry.variations.get(variation).cloned(),
        }
    }

    pub fn set(&mut self, key: RequestKey, value: T) {
        if self.primaries.get_mut(&key.primary).is_none() {
            let entry = PrimaryEntry {
                value: None,
                variations: LruMap::new(self.variations_count),
            };
            if let Some((evicted, _)) = self.primaries.insert(key.primary.clone(), entry) {
                trace!(primary = %evicted, "hierarchy_cache_evict");
            }
        }
        if let Some(entry) = self.primaries.get_mut(&key.primary) {
            match key.variation {
                None => entry.value = Some(value),
                Some(variation) => {
                    entry.variations.insert(variation, value);
                }
            }
        }
    }

    /// Forget a single entry, leaving the primary and its other variations
    /// alone.
    pub fn remove(&mut self, key: &RequestKey) {
        if let Some(entry) = self.primaries.get_mut(&key.primary) {
            match &key.variation {
                None => entry.value = None,
                Some(variation) => {
                    entry.variations.remove(variation);
                }
            }
        }
    }

    /// Drop every primary value and variation `keep` rejects.  Primaries left
    /// with nothing are dropped too.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        for primary in self.primaries.keys_by_recency() {
            let emptied = match self.primaries.peek_mut(&primary) {
                Some(entry) => {
                    if entry.value.as_ref().map_or(false, |value| !keep(value)) {
                        entry.value = None;
                    }
                    entry.variations.retain(&mut keep);
                    entry.value.is_none() && entry.variations.is_empty()
                }
                None => false,
            };
            if emptied {
                self.primaries.remove(&primary);
            }
        }
    }

    pub fn clear(&mut self) {
        self.primaries.clear();
    }

    pub fn len(&self) -> usize {
        self.primaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary(p: &str) -> RequestKey {
        RequestKey::new(p.to_string(), None)
    }

    fn variation(p: &str, v: &str) -> RequestKey {
        RequestKey::new(p.to_string(), Some(v.to_string()))
    }

    #[test]
    fn test_lru_map_evicts_least_recently_used() {
        let mut map = LruMap::new(3);
        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("b", 2), None);
        assert_eq!(map.insert("c", 3), None);
        // Reading "a" makes "b" the oldest.
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.insert("d", 4), Some(("b", 2)));
        assert_eq!(map.keys_by_recency(), vec!["d", "a", "c"]);
        // Peeking doesn't refresh.
        assert_eq!(map.peek(&"c"), Some(&3));
        assert_eq!(map.insert("e", 5), Some(("c", 3)));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_lru_map_slot_reuse() {
        let mut map = LruMap::new(2);
        map.insert(1, "one");
        map.insert(2, "two");
        assert_eq!(map.remove(&1), Some("one"));
        map.insert(3, "three");
        assert_eq!(map.keys_by_recency(), vec![3, 2]);
        assert_eq!(map.pop_oldest(), Some((2, "two")));
        assert_eq!(map.pop_oldest(), Some((3, "three")));
        assert!(map.is_empty());
        map.insert(4, "four");
        assert_eq!(map.get(&4), Some(&"four"));
    }

    #[test]
    fn test_primary_eviction() {
        let mut cache = HierarchyCache::new(2, 1);
        cache.set(primary("a"), 1);
        cache.set(primary("b"), 2);
        assert_eq!(cache.get(&primary("a")), Some(1));
        cache.set(primary("c"), 3);
        assert_eq!(cache.get(&primary("b")), None);
        assert_eq!(cache.get(&primary("a")), Some(1));
        assert_eq!(cache.get(&primary("c")), Some(3));
    }

    #[test]
    fn test_variation_isolation() {
        let mut cache = HierarchyCache::new(10, 2);
        cache.set(primary("p"), "primary");
        assert_eq!(cache.get(&variation("p", "v1")), None);

        cache.set(variation("p", "v1"), "v1");
        assert_eq!(cache.get(&primary("p")), Some("primary"));
        assert_eq!(cache.get(&variation("p", "v1")), Some("v1"));
        assert_eq!(cache.get(&variation("p", "v2")), None);

        // A third variation evicts the oldest variation, never the primary.
        cache.set(variation("p", "v2"), "v2");
        cache.set(variation("p", "v3"), "v3");
        assert_eq!(cache.get(&variation("p", "v1")), None);
        assert_eq!(cache.get(&variation("p", "v2")), Some("v2"));
        assert_eq!(cache.get(&primary("p")), Some("primary"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_variation_without_primary_value() {
        let mut cache = HierarchyCache::new(10, 1);
        cache.set(variation("p", "v"), 7);
        assert_eq!(cache.get(&primary("p")), None);
        assert_eq!(cache.get(&variation("p", "v")), Some(7));
        cache.remove(&variation("p", "v"));
        assert_eq!(cache.get(&variation("p", "v")), None);
        cache.set(primary("p"), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retain() {
        let mut map = LruMap::new(4);
        for n in 1..=4 {
            map.insert(n, n * 10);
        }
        map.get(&2);
        map.retain(|v| *v != 30);
        assert_eq!(map.keys_by_recency(), vec![2, 4, 1]);

        let mut cache = HierarchyCache::new(10, 2);
        cache.set(primary("a"), 1);
        cache.set(variation("a", "v"), 2);
        cache.set(primary("b"), 3);
        cache.set(variation("c", "v"), 4);
        cache.retain(|v| v % 2 == 1);
        assert_eq!(cache.get(&primary("a")), Some(1));
        assert_eq!(cache.get(&variation("a", "v")), None);
        assert_eq!(cache.get(&primary("b")), Some(3));
        // "c" had nothing left.
        assert_eq!(cache.len(), 2);
    }
}
