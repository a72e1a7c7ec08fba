//! Keyed publish/subscribe registry
//!
//! [`PubSub`] keeps one [`WeakList`] of subscribers per publisher key plus a
//! global list that hears every key. Buckets are created lazily and dropped
//! again once a publish finds them empty.
//!
//! Buckets are indexed by the key's 64-bit hash alone. Two distinct keys
//! with the same hash share a bucket and hear each other's publishes; that
//! is a known limitation of this registry.

use crate::list::WeakList;
use crate::scope::Scoped;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

/// Registry of weak subscriber lists keyed by publisher
pub struct PubSub<K: ?Sized, S: ?Sized> {
    /// Per-key subscribers, by key hash
    keyed: RefCell<HashMap<u64, Rc<WeakList<S>>>>,
    /// Subscribers that hear every key
    global: WeakList<S>,
    _key: PhantomData<fn(&K)>,
}

impl<K: Hash + ?Sized, S: ?Sized + Scoped> PubSub<K, S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            keyed: RefCell::new(HashMap::new()),
            global: WeakList::new(),
            _key: PhantomData,
        }
    }

    fn key_hash(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket(&self, key: &K) -> Option<Rc<WeakList<S>>> {
        self.keyed.borrow().get(&Self::key_hash(key)).cloned()
    }

    /// Subscribe to every key
    pub fn add_global_sub(&self, sub: &Rc<S>) -> bool {
        self.global.add(sub)
    }

    /// Remove a global subscriber
    pub fn remove_global_sub(&self, sub: &Rc<S>) -> bool {
        self.global.remove(sub)
    }

    /// Raw count of global subscribers
    pub fn global_sub_count(&self) -> usize {
        self.global.count()
    }

    /// Subscribe to one key
    pub fn add_sub(&self, key: &K, sub: &Rc<S>) -> bool {
        let list = Rc::clone(
            self.keyed
                .borrow_mut()
                .entry(Self::key_hash(key))
                .or_insert_with(|| Rc::new(WeakList::new())),
        );
        list.add(sub)
    }

    /// Remove a subscriber from one key
    pub fn remove_sub(&self, key: &K, sub: &Rc<S>) -> bool {
        match self.bucket(key) {
            Some(list) => list.remove(sub),
            None => false,
        }
    }

    /// Raw count of subscribers for `key`
    pub fn sub_count(&self, key: &K) -> usize {
        self.bucket(key).map(|list| list.count()).unwrap_or(0)
    }

    /// Number of keys with a bucket
    pub fn bucket_count(&self) -> usize {
        self.keyed.borrow().len()
    }

    /// Drop every subscriber of `key`
    pub fn remove_pub(&self, key: &K) -> bool {
        self.keyed.borrow_mut().remove(&Self::key_hash(key)).is_some()
    }

    /// Invoke `callback` on the subscribers of `key`, then on the global ones
    ///
    /// Subscribers may register or unregister from inside the callback; see
    /// [`WeakList::for_each`] for when that takes effect.
    pub fn publish(&self, key: &K, mut callback: impl FnMut(&Rc<S>)) {
        let hash = Self::key_hash(key);
        let bucket = self.keyed.borrow().get(&hash).cloned();
        if let Some(list) = bucket {
            list.for_each(&mut callback);
            if list.is_empty() && !list.is_traversing() {
                self.evict(hash, &list);
            }
        }
        self.global.for_each(callback);
    }

    fn evict(&self, hash: u64, list: &Rc<WeakList<S>>) {
        let mut keyed = self.keyed.borrow_mut();
        if keyed.get(&hash).is_some_and(|current| Rc::ptr_eq(current, list)) {
            keyed.remove(&hash);
        }
    }

    /// Sweep dead subscribers everywhere, returning how many were removed
    pub fn collect_garbage(&self) -> usize {
        let buckets: Vec<_> = self.keyed.borrow().values().cloned().collect();
        let keyed: usize = buckets.iter().map(|list| list.collect_garbage()).sum();
        keyed + self.global.collect_garbage()
    }
}

impl<K: Hash + ?Sized, S: ?Sized + Scoped> Default for PubSub<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ?Sized, S: ?Sized> fmt::Debug for PubSub<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("buckets", &self.keyed.borrow().len())
            .field("global", &self.global)
            .finish()
    }
}
