//! Chunk cache (component E): a bounded-LRU cache of already-decoded chunk
//! payloads, sitting in front of the chunk table + codec + segment pool on
//! the read path.

use std::collections::{HashMap, VecDeque};

/// Default number of decoded chunks kept resident (spec §4.E).
pub const DEFAULT_CACHE_SIZE: usize = 8;

pub struct ChunkCache {
    capacity: usize,
    entries: HashMap<u64, Vec<u8>>,
    usage: VecDeque<u64>,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        ChunkCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            usage: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    pub fn get(&mut self, chunk_index: u64) -> Option<&[u8]> {
        if self.entries.contains_key(&chunk_index) {
            self.usage.retain(|&i| i != chunk_index);
            self.usage.push_back(chunk_index);
            self.entries.get(&chunk_index).map(|v| v.as_slice())
        } else {
            None
        }
    }

    pub fn insert(&mut self, chunk_index: u64, data: Vec<u8>) {
        if self.entries.contains_key(&chunk_index) {
            self.usage.retain(|&i| i != chunk_index);
        } else if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(chunk_index, data);
        self.usage.push_back(chunk_index);
    }

    fn evict_one(&mut self) {
        if let Some(oldest) = self.usage.pop_front() {
            self.entries.remove(&oldest);
        }
    }

    pub fn invalidate(&mut self, chunk_index: u64) {
        self.entries.remove(&chunk_index);
        self.usage.retain(|&i| i != chunk_index);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        ChunkCache::new(DEFAULT_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_returns_hits() {
        let mut cache = ChunkCache::new(2);
        cache.insert(0, vec![1, 2, 3]);
        assert_eq!(cache.get(0), Some([1u8, 2, 3].as_slice()));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ChunkCache::new(2);
        cache.insert(0, vec![0]);
        cache.insert(1, vec![1]);
        // touch 0 so 1 becomes the LRU entry
        cache.get(0);
        cache.insert(2, vec![2]);
        assert!(cache.get(1).is_none());
        assert!(cache.get(0).is_some());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn minimum_capacity_is_one() {
        let cache = ChunkCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn invalidate_drops_single_entry() {
        let mut cache = ChunkCache::new(4);
        cache.insert(5, vec![9]);
        cache.invalidate(5);
        assert!(cache.get(5).is_none());
    }
}
