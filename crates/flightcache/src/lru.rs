//! Least-recently-used entry table
//!
//! Slab-backed doubly-linked list for O(1) promotion and eviction. The
//! list head is the most recently used entry; the tail is the next
//! eviction victim.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU map with an optional capacity bound.
///
/// With `capacity == None` the table never evicts; otherwise inserting
/// beyond the bound removes the least recently used entry and reports it
/// to the caller.
pub(crate) struct LruCache<K, V> {
    index: HashMap<K, usize, RandomState>,
    slab: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Vec<usize>,
    capacity: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        assert!(capacity != Some(0), "capacity must be greater than 0");

        let hint = capacity.unwrap_or(0);
        Self {
            index: HashMap::with_capacity_and_hasher(hint, RandomState::new()),
            slab: Vec::with_capacity(hint),
            head: None,
            tail: None,
            free: Vec::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Look up a value and mark it most recently used.
    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        self.slab[idx].as_mut().map(|node| &mut node.value)
    }

    /// Look up a value without touching its recency.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slab[idx].as_ref().map(|node| &node.value)
    }

    /// Install or replace the entry for `key`.
    ///
    /// Returns the replaced value (same key) and the evicted victim
    /// (different key, capacity pressure), at most one of which is `Some`.
    pub(crate) fn insert(&mut self, key: K, value: V) -> (Option<V>, Option<(K, V)>) {
        if let Some(&idx) = self.index.get(&key) {
            let replaced = self.slab[idx]
                .as_mut()
                .map(|node| std::mem::replace(&mut node.value, value));
            self.promote(idx);
            return (replaced, None);
        }

        let evicted = match self.capacity {
            Some(cap) if self.index.len() >= cap => self.evict_tail(),
            _ => None,
        };

        let idx = self.alloc();
        self.slab[idx] = Some(Node {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });
        self.attach_front(idx);
        self.index.insert(key, idx);

        (None, evicted)
    }

    /// Remove the entry for `key`, returning its value.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slab[idx].take().map(|node| node.value)
    }

    /// Remove every entry, returning the drained pairs.
    pub(crate) fn drain(&mut self) -> Vec<(K, V)> {
        let drained = self
            .slab
            .iter_mut()
            .filter_map(|slot| slot.take())
            .map(|node| (node.key, node.value))
            .collect();

        self.index.clear();
        self.slab.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;

        drained
    }

    fn evict_tail(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        self.free.push(idx);
        let node = self.slab[idx].take()?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        if let Some(node) = self.slab[idx].as_mut() {
            node.prev = None;
            node.next = self.head;
        }
        self.attach_front(idx);
    }

    fn attach_front(&mut self, idx: usize) {
        if let Some(old_head) = self.head {
            if let Some(node) = self.slab[old_head].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slab[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slab[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slab[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn alloc(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            idx
        } else {
            self.slab.push(None);
            self.slab.len() - 1
        }
    }
}
