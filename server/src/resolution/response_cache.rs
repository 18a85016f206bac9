use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

use lru::LruCache;
use simple_dns::RCODE;

use super::dns_packets::{CacheKey, ParsedPacket};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Cache capacity must be at least 1.")]
    ZeroCapacity,
}

/// A cached upstream response.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub response: Vec<u8>,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    /// Identifies this exact insertion so a stale expiry timer can't remove a newer entry.
    generation: u64,
}

#[derive(Debug)]
struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    next_generation: u64,
}

impl CacheState {
    /// Removes the key only if it still holds the entry the timer was scheduled for.
    fn remove_if_generation(&mut self, key: &CacheKey, generation: u64) -> Option<CacheEntry> {
        let matches = self
            .entries
            .peek(key)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        self.entries.pop(key)
    }
}

/**
 * LRU cache for upstream responses.
 * Bounded by entry count. Every entry additionally expires after the lowest ttl of its answers.
 * Use `.clone()` to give each task a handle. The data stays shared.
 */
#[derive(Clone, Debug)]
pub struct ResponseCache {
    state: Arc<Mutex<CacheState>>,
    default_ttl: u32,
}

impl ResponseCache {
    pub fn new(capacity: usize, default_ttl: u32) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CacheError::ZeroCapacity)?;
        Ok(Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                next_generation: 0,
            })),
            default_ttl,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("Lock is always successful except when poisoned. If poisened it will be poisened forever. We panic here because we can't recover from this.")
    }

    /// Seconds a response stays cached. The configured default is the upper bound
    /// and is also used for responses without answers.
    pub fn ttl_for(&self, response: &ParsedPacket) -> u32 {
        match response.lowest_answer_ttl() {
            Some(ttl) => ttl.min(self.default_ttl),
            None => self.default_ttl,
        }
    }

    /// Get the cached response. Marks the key as most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut locked = self.lock();
        let now = Instant::now();
        let expired = match locked.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= now,
        };
        if expired {
            // The expiry timer hasn't fired yet.
            locked.entries.pop(key);
            return None;
        }
        locked.entries.peek(key).map(|entry| entry.response.clone())
    }

    /// Caches a response and schedules its removal.
    /// Returns false if the response isn't cacheable (not NOERROR or a ttl of 0).
    pub fn insert(&self, key: CacheKey, response: &ParsedPacket) -> bool {
        if response.rcode() != RCODE::NoError {
            return false;
        }
        let ttl = self.ttl_for(response);
        if ttl == 0 {
            return false;
        }
        let ttl = Duration::from_secs(ttl as u64);
        let now = Instant::now();

        let generation = {
            let mut locked = self.lock();
            let generation = locked.next_generation;
            locked.next_generation += 1;
            let entry = CacheEntry {
                response: response.raw_bytes().clone(),
                inserted_at: now,
                expires_at: now + ttl,
                generation,
            };
            if let Some((evicted, _)) = locked.entries.push(key.clone(), entry) {
                if evicted != key {
                    tracing::trace!("Cache full. Evicted least recently used {evicted}.");
                }
            }
            generation
        };

        Self::schedule_expiry(Arc::downgrade(&self.state), key, generation, ttl);
        true
    }

    fn schedule_expiry(state: Weak<Mutex<CacheState>>, key: CacheKey, generation: u64, ttl: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(state) = state.upgrade() else {
                return; // Cache dropped in the meantime.
            };
            let mut locked = match state.lock() {
                Ok(locked) => locked,
                Err(_) => return,
            };
            if let Some(entry) = locked.remove_if_generation(&key, generation) {
                tracing::trace!(
                    "Cache entry {key} expired after {}ms.",
                    entry.inserted_at.elapsed().as_millis()
                );
            }
        });
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time until the entry expires. None if not cached.
    pub fn remaining_ttl(&self, key: &CacheKey) -> Option<Duration> {
        let locked = self.lock();
        locked
            .entries
            .peek(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
    }
}
