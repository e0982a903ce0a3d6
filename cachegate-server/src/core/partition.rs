use super::types::{CachedEntry, RequestKey, StoredResponse};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A named cache partition
///
/// Entries are kept in insertion order. Reads never reorder, so eviction
/// is FIFO: the oldest insert goes first. Overwriting a key counts as a
/// fresh insert and moves it to the back.
#[derive(Clone)]
pub struct CachePartition {
    name: Arc<str>,
    inner: Arc<RwLock<PartitionInner>>,
}

struct PartitionInner {
    entries: HashMap<RequestKey, CachedEntry>,
    /// Insertion order (oldest at front)
    order: VecDeque<RequestKey>,
    next_seq: u64,
}

impl PartitionInner {
    fn insert(&mut self, key: RequestKey, response: StoredResponse) -> bool {
        let is_new = !self.entries.contains_key(&key);
        if !is_new {
            self.order.retain(|k| k != &key);
        }

        let entry = CachedEntry {
            response,
            seq: self.next_seq,
            stored_at: Instant::now(),
        };
        self.next_seq += 1;

        self.entries.insert(key.clone(), entry);
        self.order.push_back(key);
        is_new
    }

    fn evict_to(&mut self, max_items: usize) -> Vec<RequestKey> {
        let mut evicted = Vec::new();
        while self.entries.len() > max_items {
            match self.order.pop_front() {
                Some(oldest) => {
                    if self.entries.remove(&oldest).is_some() {
                        evicted.push(oldest);
                    }
                }
                None => break,
            }
        }
        evicted
    }
}

impl fmt::Debug for CachePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePartition")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}

impl CachePartition {
    /// Create an empty partition
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            inner: Arc::new(RwLock::new(PartitionInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a stored response
    pub fn get(&self, key: &RequestKey) -> Option<StoredResponse> {
        let inner = self.inner.read();
        inner.entries.get(key).map(|e| e.response.clone())
    }

    /// Look up with bookkeeping (insertion sequence, age)
    pub fn get_entry(&self, key: &RequestKey) -> Option<CachedEntry> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Store a response, overwriting any existing entry for the key.
    /// Returns true when the key was not present before.
    pub fn put(&self, key: RequestKey, response: StoredResponse) -> bool {
        let size = response.body.len();
        let is_new = self.inner.write().insert(key.clone(), response);
        debug!(
            "PUT [{}] {} ({} bytes, new={})",
            self.name, key, size, is_new
        );
        is_new
    }

    /// Store a response while keeping the partition at or below `max_items`.
    ///
    /// Oldest entries are evicted first so that the insert fits. Trim and
    /// insert happen under one write lock. Returns the evicted keys.
    pub fn put_bounded(
        &self,
        key: RequestKey,
        response: StoredResponse,
        max_items: usize,
    ) -> Vec<RequestKey> {
        if max_items == 0 {
            return Vec::new();
        }

        let mut inner = self.inner.write();
        let room_needed = usize::from(!inner.entries.contains_key(&key));
        let evicted = inner.evict_to(max_items - room_needed);
        inner.insert(key.clone(), response);
        drop(inner);

        for k in &evicted {
            debug!("EVICT [{}] {}", self.name, k);
        }
        debug!("PUT [{}] {} (bounded, cap={})", self.name, key, max_items);
        evicted
    }

    /// Evict oldest entries until at most `max_items` remain
    pub fn trim(&self, max_items: usize) -> Vec<RequestKey> {
        let evicted = self.inner.write().evict_to(max_items);
        if !evicted.is_empty() {
            debug!(
                "TRIM [{}] evicted {} entries (cap={})",
                self.name,
                evicted.len(),
                max_items
            );
        }
        evicted
    }

    /// Delete one entry
    pub fn delete(&self, key: &RequestKey) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|k| k != key);
            debug!("DELETE [{}] {}", self.name, key);
            true
        } else {
            false
        }
    }

    /// Keys in insertion order, oldest first
    pub fn keys(&self) -> Vec<RequestKey> {
        self.inner.read().order.iter().cloned().collect()
    }

    /// Entries in insertion order, oldest first
    pub fn entries(&self) -> Vec<(RequestKey, StoredResponse)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|k| inner.entries.get(k).map(|e| (k.clone(), e.response.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total body bytes held
    pub fn body_bytes(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .map(|e| e.response.body.len())
            .sum()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        debug!("CLEAR [{}] ({} entries)", self.name, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(format!("http://origin{}", path))
    }

    fn body(text: &'static str) -> StoredResponse {
        StoredResponse::new(200, vec![], text)
    }

    #[test]
    fn test_put_get() {
        let part = CachePartition::new("static");

        assert!(part.put(key("/a"), body("alpha")));
        let value = part.get(&key("/a")).unwrap();
        assert_eq!(value.body.as_ref(), b"alpha");
        assert_eq!(part.len(), 1);
    }

    #[test]
    fn test_overwrite_is_last_write_wins() {
        let part = CachePartition::new("dynamic");

        assert!(part.put(key("/a"), body("one")));
        assert!(!part.put(key("/a"), body("two")));

        assert_eq!(part.len(), 1);
        assert_eq!(part.get(&key("/a")).unwrap().body.as_ref(), b"two");
    }

    #[test]
    fn test_trim_evicts_oldest_first() {
        let part = CachePartition::new("dynamic");
        for p in ["/1", "/2", "/3", "/4", "/5"] {
            part.put(key(p), body("x"));
        }

        let evicted = part.trim(3);

        assert_eq!(evicted, vec![key("/1"), key("/2")]);
        assert_eq!(part.keys(), vec![key("/3"), key("/4"), key("/5")]);
    }

    #[test]
    fn test_reads_do_not_reorder() {
        let part = CachePartition::new("dynamic");
        part.put(key("/1"), body("x"));
        part.put(key("/2"), body("x"));
        part.put(key("/3"), body("x"));

        // FIFO, not LRU: touching /1 must not save it
        part.get(&key("/1"));
        part.get(&key("/1"));

        let evicted = part.trim(2);
        assert_eq!(evicted, vec![key("/1")]);
    }

    #[test]
    fn test_overwrite_moves_to_back() {
        let part = CachePartition::new("dynamic");
        part.put(key("/1"), body("x"));
        part.put(key("/2"), body("x"));
        part.put(key("/1"), body("y"));

        assert_eq!(part.keys(), vec![key("/2"), key("/1")]);
        assert!(part.get_entry(&key("/1")).unwrap().seq > part.get_entry(&key("/2")).unwrap().seq);
    }

    #[test]
    fn test_put_bounded_never_exceeds_cap() {
        let part = CachePartition::new("dynamic");
        let cap = 4;

        for i in 0..20 {
            part.put_bounded(key(&format!("/img{}.png", i)), body("x"), cap);
            assert!(part.len() <= cap, "len {} over cap after insert {}", part.len(), i);
        }

        let survivors: Vec<_> = (16..20).map(|i| key(&format!("/img{}.png", i))).collect();
        assert_eq!(part.keys(), survivors);
    }

    #[test]
    fn test_put_bounded_overwrite_does_not_evict() {
        let part = CachePartition::new("dynamic");
        part.put_bounded(key("/1"), body("x"), 2);
        part.put_bounded(key("/2"), body("x"), 2);

        let evicted = part.put_bounded(key("/2"), body("y"), 2);

        assert!(evicted.is_empty());
        assert_eq!(part.len(), 2);
    }

    #[test]
    fn test_put_bounded_zero_cap_stores_nothing() {
        let part = CachePartition::new("dynamic");
        part.put_bounded(key("/1"), body("x"), 0);
        assert!(part.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let part = CachePartition::new("static");
        part.put(key("/a"), body("a"));
        part.put(key("/b"), body("bb"));
        assert_eq!(part.body_bytes(), 3);

        assert!(part.delete(&key("/a")));
        assert!(!part.delete(&key("/a")));
        assert_eq!(part.keys(), vec![key("/b")]);

        part.clear();
        assert!(part.is_empty());
        assert!(part.keys().is_empty());
    }

    #[test]
    fn test_concurrent_bounded_puts_respect_cap() {
        let part = CachePartition::new("dynamic");
        let cap = 8;

        std::thread::scope(|s| {
            for t in 0..4 {
                let part = part.clone();
                s.spawn(move || {
                    for i in 0..50 {
                        part.put_bounded(key(&format!("/t{}/{}", t, i)), body("x"), cap);
                    }
                });
            }
        });

        assert!(part.len() <= cap);
        assert_eq!(part.keys().len(), part.len());
    }
}
