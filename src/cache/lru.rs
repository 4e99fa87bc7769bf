//! # Bounded LRU cache
//!
//! A generic, thread-safe, capacity-bounded least-recently-used cache
//! (§4.2). Backed by an arena of slots rather than raw pointers: each slot
//! is either a sentinel or an occupied entry, and the doubly-linked
//! recency list is expressed as indices into the arena. This keeps the
//! whole structure free of `unsafe` while still giving O(1) `set`/`get`/
//! `delete`.
//!
//! The arena's first two slots are permanently reserved as the head and
//! tail sentinels (indices [`HEAD`] and [`TAIL`]); real entries start at
//! index 2. Evicted/removed slots are returned to a free list so the
//! arena never grows past `capacity + 2`.
//!
//! The whole structure lives behind a [`tokio::sync::Mutex`] rather than a
//! synchronous one: [`LruCache::get_or_set`]'s single-flight path holds
//! the lock across an `.await`ed producer call by design (§5), so the
//! lock itself must be async-lockable.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::Mutex;

use crate::error::{Error, Result};

const HEAD: usize = 0;
const TAIL: usize = 1;

enum Slot<K, V> {
    Sentinel { prev: usize, next: usize },
    Occupied {
        key: K,
        value: V,
        prev: usize,
        next: usize,
    },
    Free { next_free: Option<usize> },
}

struct Inner<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    free_head: Option<usize>,
    capacity: usize,
    len: usize,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        let slots = vec![
            Slot::Sentinel { prev: TAIL, next: TAIL },
            Slot::Sentinel { prev: HEAD, next: HEAD },
        ];
        let mut inner = Self {
            slots,
            index: HashMap::new(),
            free_head: None,
            capacity,
            len: 0,
        };
        // head.next = tail, tail.prev = head initially (empty list).
        inner.set_links(HEAD, TAIL, TAIL);
        inner.set_links(TAIL, HEAD, HEAD);
        inner
    }

    fn set_links(&mut self, at: usize, prev: usize, next: usize) {
        match &mut self.slots[at] {
            Slot::Sentinel { prev: p, next: n } | Slot::Occupied { prev: p, next: n, .. } => {
                *p = prev;
                *n = next;
            }
            Slot::Free { .. } => unreachable!("set_links called on a free slot"),
        }
    }

    fn prev_of(&self, at: usize) -> usize {
        match &self.slots[at] {
            Slot::Sentinel { prev, .. } | Slot::Occupied { prev, .. } => *prev,
            Slot::Free { .. } => unreachable!("prev_of called on a free slot"),
        }
    }

    fn next_of(&self, at: usize) -> usize {
        match &self.slots[at] {
            Slot::Sentinel { next, .. } | Slot::Occupied { next, .. } => *next,
            Slot::Free { .. } => unreachable!("next_of called on a free slot"),
        }
    }

    fn unlink(&mut self, at: usize) {
        let prev = self.prev_of(at);
        let next = self.next_of(at);
        self.set_links(prev, self.prev_of(prev), next);
        self.set_links(next, prev, self.next_of(next));
    }

    /// Insert `at` immediately after `HEAD` (the most-recently-used end).
    fn push_front(&mut self, at: usize) {
        let old_first = self.next_of(HEAD);
        self.set_links(at, HEAD, old_first);
        self.set_links(HEAD, self.prev_of(HEAD), at);
        self.set_links(old_first, at, self.next_of(old_first));
    }

    fn touch(&mut self, at: usize) {
        self.unlink(at);
        self.push_front(at);
    }

    fn alloc_slot(&mut self, key: K, value: V) -> usize {
        if let Some(free) = self.free_head {
            let next_free = match &self.slots[free] {
                Slot::Free { next_free } => *next_free,
                _ => unreachable!("free_head did not point at a free slot"),
            };
            self.free_head = next_free;
            self.slots[free] = Slot::Occupied {
                key,
                value,
                prev: HEAD,
                next: HEAD,
            };
            free
        } else {
            self.slots.push(Slot::Occupied {
                key,
                value,
                prev: HEAD,
                next: HEAD,
            });
            self.slots.len() - 1
        }
    }

    fn free_slot(&mut self, at: usize) {
        self.slots[at] = Slot::Free {
            next_free: self.free_head,
        };
        self.free_head = Some(at);
    }

    fn evict_lru(&mut self) -> Option<K> {
        let victim = self.prev_of(HEAD);
        if victim == HEAD {
            return None;
        }
        self.remove_at(victim)
    }

    fn remove_at(&mut self, at: usize) -> Option<K> {
        self.unlink(at);
        let key = match std::mem::replace(&mut self.slots[at], Slot::Free { next_free: None }) {
            Slot::Occupied { key, .. } => key,
            other => {
                self.slots[at] = other;
                return None;
            }
        };
        self.index.remove(&key);
        self.free_slot(at);
        self.len -= 1;
        Some(key)
    }

    fn value_at(&self, at: usize) -> &V {
        match &self.slots[at] {
            Slot::Occupied { value, .. } => value,
            _ => unreachable!("value_at called on a non-occupied slot"),
        }
    }

    fn value_at_mut(&mut self, at: usize) -> &mut V {
        match &mut self.slots[at] {
            Slot::Occupied { value, .. } => value,
            _ => unreachable!("value_at_mut called on a non-occupied slot"),
        }
    }
}

/// A capacity-bounded, async-lockable LRU cache.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone + Send + Sync, V: Send + Sync> LruCache<K, V> {
    /// Create a new cache. `capacity == 0` means unbounded.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::with_capacity(capacity)),
        }
    }

    /// Current number of entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Unconditionally insert or replace `key`, evicting the least-recently
    /// used entry if at capacity. Returns the evicted key, if any.
    pub async fn set(&self, key: K, value: V) -> Option<K> {
        let mut inner = self.inner.lock().await;
        if let Some(&at) = inner.index.get(&key) {
            *inner.value_at_mut(at) = value;
            inner.touch(at);
            return None;
        }

        let mut evicted = None;
        if inner.capacity > 0 && inner.len >= inner.capacity {
            evicted = inner.evict_lru();
        }

        let at = inner.alloc_slot(key.clone(), value);
        inner.index.insert(key, at);
        inner.push_front(at);
        inner.len += 1;
        evicted
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.inner.lock().await;
        let at = *inner.index.get(key)?;
        inner.touch(at);
        Some(inner.value_at(at).clone())
    }

    /// Remove `key`, returning its value if present.
    pub async fn delete(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let at = *inner.index.get(key)?;
        inner.unlink(at);
        let value = match std::mem::replace(&mut inner.slots[at], Slot::Free { next_free: None }) {
            Slot::Occupied { value, .. } => value,
            other => {
                inner.slots[at] = other;
                return None;
            }
        };
        inner.index.remove(key);
        inner.free_slot(at);
        inner.len -= 1;
        Some(value)
    }

    /// All keys, most-recently-used first. O(n).
    pub async fn list_keys(&self) -> Vec<K> {
        let inner = self.inner.lock().await;
        let mut keys = Vec::with_capacity(inner.len);
        let mut at = inner.next_of(HEAD);
        while at != TAIL {
            if let Slot::Occupied { key, .. } = &inner.slots[at] {
                keys.push(key.clone());
            }
            at = inner.next_of(at);
        }
        keys
    }

    /// Change capacity, evicting from the LRU end until at or under the new
    /// bound. `new_capacity == 0` means unbounded. Rejects negative sizes
    /// at the call site (`TokenCache::resize` converts from the signed
    /// public type and maps negatives to [`Error::InvalidSize`]).
    pub async fn resize(&self, new_capacity: usize) -> Vec<K> {
        let mut inner = self.inner.lock().await;
        inner.capacity = new_capacity;
        let mut evicted = Vec::new();
        if new_capacity > 0 {
            while inner.len > new_capacity {
                match inner.evict_lru() {
                    Some(key) => evicted.push(key),
                    None => break,
                }
            }
        }
        evicted
    }

    /// Single-flight get-or-populate: on a miss, `produce` is invoked while
    /// the cache's internal lock is held, so concurrent callers for *any*
    /// key serialize behind the in-flight fetch (§5's accepted trade-off —
    /// a slow producer blocks the whole cache, not just same-key callers).
    /// `condition` gates whether a hit is accepted as-is or treated as a
    /// miss (used by the token cache to reject expired entries). Returns
    /// the evicted key alongside the value, if a miss forced an eviction.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: K,
        condition: impl Fn(&V) -> bool,
        produce: F,
    ) -> Result<(V, Option<K>)>
    where
        V: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut inner = self.inner.lock().await;

        if let Some(&at) = inner.index.get(&key) {
            if condition(inner.value_at(at)) {
                inner.touch(at);
                return Ok((inner.value_at(at).clone(), None));
            }
        }

        let value = produce().await?;

        if let Some(&at) = inner.index.get(&key) {
            *inner.value_at_mut(at) = value.clone();
            inner.touch(at);
            return Ok((value, None));
        }

        let mut evicted = None;
        if inner.capacity > 0 && inner.len >= inner.capacity {
            evicted = inner.evict_lru();
        }
        let at = inner.alloc_slot(key.clone(), value.clone());
        inner.index.insert(key, at);
        inner.push_front(at);
        inner.len += 1;
        Ok((value, evicted))
    }
}

/// Validate a signed, user-facing capacity request and convert it to the
/// unsigned form the arena uses internally. `0` means unbounded; negative
/// values are rejected.
pub fn validate_capacity(requested: i64) -> Result<usize> {
    if requested < 0 {
        return Err(Error::InvalidSize(requested));
    }
    Ok(requested as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let cache: LruCache<&'static str, i32> = LruCache::new(2);
        cache.set("a", 1).await;
        assert_eq!(cache.get(&"a").await, Some(1));
    }

    #[tokio::test]
    async fn evicts_least_recently_used_on_overflow() {
        let cache: LruCache<&'static str, i32> = LruCache::new(2);
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        // touch "a" so "b" becomes least-recently-used
        let _ = cache.get(&"a").await;
        let evicted = cache.set("c", 3).await;
        assert_eq!(evicted, Some("b"));
        assert_eq!(cache.get(&"b").await, None);
        assert_eq!(cache.get(&"a").await, Some(1));
        assert_eq!(cache.get(&"c").await, Some(3));
    }

    #[tokio::test]
    async fn delete_removes_entry_and_frees_slot_for_reuse() {
        let cache: LruCache<&'static str, i32> = LruCache::new(2);
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        assert_eq!(cache.delete(&"a").await, Some(1));
        assert_eq!(cache.len().await, 1);
        cache.set("c", 3).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&"c").await, Some(3));
    }

    #[tokio::test]
    async fn list_keys_reports_most_recently_used_first() {
        let cache: LruCache<&'static str, i32> = LruCache::new(0);
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        cache.set("c", 3).await;
        assert_eq!(cache.list_keys().await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn resize_down_evicts_from_lru_end() {
        let cache: LruCache<&'static str, i32> = LruCache::new(0);
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        cache.set("c", 3).await;
        let evicted = cache.resize(1).await;
        assert_eq!(evicted, vec!["b", "a"]);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&"c").await, Some(3));
    }

    #[tokio::test]
    async fn resize_to_zero_means_unbounded() {
        let cache: LruCache<&'static str, i32> = LruCache::new(1);
        cache.set("a", 1).await;
        cache.resize(0).await;
        cache.set("b", 2).await;
        cache.set("c", 3).await;
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn get_or_set_populates_on_miss_and_reuses_on_hit() {
        let cache: LruCache<&'static str, i32> = LruCache::new(0);
        let mut calls = 0;
        let (first, evicted) = cache
            .get_or_set("a", |_| true, || async {
                calls += 1;
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(first, 42);
        assert_eq!(evicted, None);
        let (second, _) = cache
            .get_or_set("a", |_| true, || async {
                calls += 1;
                Ok(99)
            })
            .await
            .unwrap();
        assert_eq!(second, 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn get_or_set_refetches_when_condition_rejects_the_cached_value() {
        let cache: LruCache<&'static str, i32> = LruCache::new(0);
        cache.set("a", 1).await;
        let (refreshed, _) = cache
            .get_or_set("a", |v| *v > 1, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(refreshed, 2);
        assert_eq!(cache.get(&"a").await, Some(2));
    }

    #[tokio::test]
    async fn get_or_set_reports_the_evicted_key_on_a_miss_at_capacity() {
        let cache: LruCache<&'static str, i32> = LruCache::new(1);
        cache.set("a", 1).await;
        let (value, evicted) = cache.get_or_set("b", |_| true, || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(evicted, Some("a"));
    }

    #[test]
    fn validate_capacity_rejects_negative_sizes() {
        assert!(validate_capacity(-1).is_err());
        assert_eq!(validate_capacity(0).unwrap(), 0);
        assert_eq!(validate_capacity(5).unwrap(), 5);
    }
}
