//! Time-bounded "already handled" caches.
//!
//! These only save remote calls. Losing an entry costs a redundant fetch,
//! never data.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Writes between full sweeps of expired entries.
const SWEEP_EVERY: usize = 256;

pub struct TimedCache<K> {
    ttl: Duration,
    inner: Mutex<CacheInner<K>>,
}

struct CacheInner<K> {
    entries: HashMap<K, Instant>,
    writes_since_sweep: usize,
}

impl<K: Eq + Hash> TimedCache<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                writes_since_sweep: 0,
            }),
        }
    }

    pub fn seen(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            None => false,
            Some(at) if at.elapsed() >= self.ttl => {
                inner.entries.remove(key);
                false
            }
            Some(_) => true,
        }
    }

    /// Insert or refresh `key`.
    pub fn mark(&self, key: K) {
        let mut inner = self.inner.lock();
        inner.entries.insert(key, Instant::now());
        inner.writes_since_sweep += 1;
        if inner.writes_since_sweep >= SWEEP_EVERY {
            let ttl = self.ttl;
            inner.entries.retain(|_, at| at.elapsed() < ttl);
            inner.writes_since_sweep = 0;
        }
    }

    /// Entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Two-tier cache: account-wide, and per chat.
pub struct SeenCache<K> {
    core: TimedCache<K>,
    chats: TimedCache<(i64, K)>,
}

impl<K: Eq + Hash + Clone> SeenCache<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            core: TimedCache::new(ttl),
            chats: TimedCache::new(ttl),
        }
    }

    pub fn seen_core(&self, key: &K) -> bool {
        self.core.seen(key)
    }

    pub fn seen_in_chat(&self, chat_id: i64, key: &K) -> bool {
        self.chats.seen(&(chat_id, key.clone()))
    }

    /// Resolved in both tiers, so nothing is left to do for this chat.
    pub fn fully_seen(&self, chat_id: i64, key: &K) -> bool {
        self.seen_core(key) && self.seen_in_chat(chat_id, key)
    }

    pub fn mark_core(&self, key: K) {
        self.core.mark(key);
    }

    pub fn mark_in_chat(&self, chat_id: i64, key: K) {
        self.chats.mark((chat_id, key));
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.chats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = TimedCache::new(Duration::from_secs(1));
        cache.mark(7u64);
        assert!(cache.seen(&7));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!cache.seen(&7));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_refreshes_entry() {
        let cache = TimedCache::new(Duration::from_secs(1));
        cache.mark(1u64);
        tokio::time::advance(Duration::from_millis(800)).await;
        cache.mark(1);
        tokio::time::advance(Duration::from_millis(800)).await;
        assert!(cache.seen(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_swept_on_write() {
        let cache = TimedCache::new(Duration::from_secs(1));
        for i in 0..100u64 {
            cache.mark(i);
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        for i in 100..(100 + SWEEP_EVERY as u64) {
            cache.mark(i);
        }
        assert!(cache.len() <= SWEEP_EVERY);
    }

    #[test]
    fn tiers_are_independent() {
        let cache = SeenCache::new(Duration::from_secs(60));
        cache.mark_core(5u64);
        assert!(!cache.fully_seen(-1, &5));
        cache.mark_in_chat(-1, 5);
        assert!(cache.fully_seen(-1, &5));
        assert!(!cache.fully_seen(-2, &5));
    }
}
