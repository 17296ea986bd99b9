use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Message ids already handled by one consumer. Bounded both by count
/// (oldest evicted first) and by age.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&mut self, message_id: &str) -> bool {
        self.contains_at(message_id, Instant::now())
    }

    pub fn insert(&mut self, message_id: &str) {
        self.insert_at(message_id, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn contains_at(&mut self, message_id: &str, now: Instant) -> bool {
        self.expire(now);
        self.seen.contains_key(message_id)
    }

    fn insert_at(&mut self, message_id: &str, now: Instant) {
        self.expire(now);
        self.seen.insert(message_id.to_string(), now);
        self.order.push_back((message_id.to_string(), now));

        while self.seen.len() > self.capacity {
            if !self.pop_oldest() {
                break;
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some((_, inserted)) = self.order.front() {
            if now.saturating_duration_since(*inserted) < self.ttl {
                break;
            }
            self.pop_oldest();
        }
    }

    /// Drops the oldest queue slot, and the id with it unless the id was
    /// re-inserted since.
    fn pop_oldest(&mut self) -> bool {
        let Some((message_id, inserted)) = self.order.pop_front() else {
            return false;
        };
        if self.seen.get(&message_id) == Some(&inserted) {
            self.seen.remove(&message_id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_ids() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        assert!(!cache.contains("a"));
        cache.insert("a");
        assert!(cache.contains("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut cache = DedupCache::new(2, Duration::from_secs(60));
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsertion_refreshes_an_id() {
        let mut cache = DedupCache::new(2, Duration::from_secs(60));
        cache.insert("a");
        cache.insert("b");
        cache.insert("a");
        cache.insert("c");
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn expires_ids_after_ttl() {
        let mut cache = DedupCache::new(10, Duration::from_secs(60));
        let start = Instant::now();
        cache.insert_at("a", start);
        cache.insert_at("b", start + Duration::from_secs(30));

        assert!(cache.contains_at("a", start + Duration::from_secs(59)));
        assert!(!cache.contains_at("a", start + Duration::from_secs(60)));
        assert!(cache.contains_at("b", start + Duration::from_secs(60)));
        assert_eq!(cache.len(), 1);
    }
}
