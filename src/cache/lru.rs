//! O(1) LRU cache: hash map into a slab of doubly-linked entries.
//!
//! Links are slab indices, so touching an entry never allocates.

use std::hash::Hash;

use hashbrown::HashMap;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
  key: K,
  value: V,
  prev: usize,
  next: usize,
}

/// Fixed-capacity LRU map.
pub struct LruCache<K: Eq + Hash + Clone, V> {
  map: HashMap<K, usize>,
  slots: Vec<Option<Entry<K, V>>>,
  free: Vec<usize>,
  head: usize,
  tail: usize,
  capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      map: HashMap::with_capacity(capacity),
      slots: Vec::with_capacity(capacity),
      free: Vec::new(),
      head: NIL,
      tail: NIL,
      capacity,
    }
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn detach(&mut self, idx: usize) {
    let (prev, next) = {
      let entry = self.slots[idx].as_ref().unwrap();
      (entry.prev, entry.next)
    };
    if prev != NIL {
      self.slots[prev].as_mut().unwrap().next = next;
    } else {
      self.head = next;
    }
    if next != NIL {
      self.slots[next].as_mut().unwrap().prev = prev;
    } else {
      self.tail = prev;
    }
  }

  fn push_front(&mut self, idx: usize) {
    {
      let entry = self.slots[idx].as_mut().unwrap();
      entry.prev = NIL;
      entry.next = self.head;
    }
    if self.head != NIL {
      self.slots[self.head].as_mut().unwrap().prev = idx;
    }
    self.head = idx;
    if self.tail == NIL {
      self.tail = idx;
    }
  }

  /// Look up and mark most-recently used.
  pub fn get(&mut self, key: &K) -> Option<&V> {
    let idx = *self.map.get(key)?;
    if self.head != idx {
      self.detach(idx);
      self.push_front(idx);
    }
    self.slots[idx].as_ref().map(|entry| &entry.value)
  }

  /// Insert or replace, evicting the least-recently-used entry when
  /// full.
  pub fn insert(&mut self, key: K, value: V) {
    if let Some(&idx) = self.map.get(&key) {
      self.slots[idx].as_mut().unwrap().value = value;
      if self.head != idx {
        self.detach(idx);
        self.push_front(idx);
      }
      return;
    }

    if self.map.len() >= self.capacity {
      let victim = self.tail;
      if victim != NIL {
        self.detach(victim);
        let entry = self.slots[victim].take().unwrap();
        self.map.remove(&entry.key);
        self.free.push(victim);
      }
    }

    let idx = match self.free.pop() {
      Some(idx) => {
        self.slots[idx] = Some(Entry {
          key: key.clone(),
          value,
          prev: NIL,
          next: NIL,
        });
        idx
      }
      None => {
        self.slots.push(Some(Entry {
          key: key.clone(),
          value,
          prev: NIL,
          next: NIL,
        }));
        self.slots.len() - 1
      }
    };

    self.push_front(idx);
    self.map.insert(key, idx);
  }

  pub fn remove(&mut self, key: &K) -> Option<V> {
    let idx = self.map.remove(key)?;
    self.detach(idx);
    let entry = self.slots[idx].take().unwrap();
    self.free.push(idx);
    Some(entry.value)
  }

  pub fn clear(&mut self) {
    self.map.clear();
    self.slots.clear();
    self.free.clear();
    self.head = NIL;
    self.tail = NIL;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn evicts_least_recently_used() {
    let mut cache = LruCache::new(2);
    cache.insert("a", 1);
    cache.insert("b", 2);

    // Touch "a" so "b" becomes the victim.
    assert_eq!(cache.get(&"a"), Some(&1));
    cache.insert("c", 3);

    assert_eq!(cache.get(&"b"), None);
    assert_eq!(cache.get(&"a"), Some(&1));
    assert_eq!(cache.get(&"c"), Some(&3));
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn insert_replaces_value() {
    let mut cache = LruCache::new(2);
    cache.insert("a", 1);
    cache.insert("a", 9);
    assert_eq!(cache.get(&"a"), Some(&9));
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn remove_frees_slot_for_reuse() {
    let mut cache = LruCache::new(3);
    cache.insert(1, "one");
    cache.insert(2, "two");
    assert_eq!(cache.remove(&1), Some("one"));
    assert_eq!(cache.get(&1), None);

    cache.insert(3, "three");
    cache.insert(4, "four");
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&2), Some(&"two"));
  }

  #[test]
  fn clear_empties_everything() {
    let mut cache = LruCache::new(4);
    for i in 0..4 {
      cache.insert(i, i * 10);
    }
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.get(&0), None);
    cache.insert(7, 70);
    assert_eq!(cache.get(&7), Some(&70));
  }

  #[test]
  fn single_slot_cache() {
    let mut cache = LruCache::new(1);
    cache.insert("x", 1);
    cache.insert("y", 2);
    assert_eq!(cache.get(&"x"), None);
    assert_eq!(cache.get(&"y"), Some(&2));
  }
}
