//! # In-Memory Keyspace
//!
//! Numbered databases of byte keys with millisecond expiry.
//!
//! ## Design Principles
//!
//! 1. **TTL Fast Path**: Expiration is checked on access; a periodic sweep
//!    reclaims keys nobody touches.
//! 2. **Single Lock**: The whole keyspace sits behind one mutex so a queued
//!    MULTI group runs without interleaving.
//! 3. **Explicit Time**: Every operation takes `now`, keeping tests
//!    deterministic.

use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;

/// Databases created when none is configured.
pub const DEFAULT_DATABASES: usize = 16;

/// TTL state for a key, mirroring PTTL semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// One numbered database.
#[derive(Debug)]
pub struct Database {
    map: HashMap<Vec<u8>, Entry, RandomState>,
}

impl Database {
    fn new(hash_state: RandomState) -> Self {
        Database {
            map: HashMap::with_hasher(hash_state),
        }
    }

    /// Drops `key` if it has expired, then reports whether it is live.
    fn live(&mut self, key: &[u8], now: Instant) -> bool {
        match self.map.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.map.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<&[u8]> {
        if !self.live(key, now) {
            return None;
        }
        self.map.get(key).map(|entry| entry.value.as_slice())
    }

    pub fn contains(&mut self, key: &[u8], now: Instant) -> bool {
        self.live(key, now)
    }

    /// Stores a value, replacing any previous value and TTL.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>, expires_at: Option<Instant>) {
        self.map.insert(key, Entry { value, expires_at });
    }

    pub fn remove(&mut self, key: &[u8], now: Instant) -> bool {
        self.live(key, now) && self.map.remove(key).is_some()
    }

    /// Attaches an expiry to a live key. Returns false when the key is absent.
    pub fn expire_at(&mut self, key: &[u8], deadline: Instant, now: Instant) -> bool {
        if !self.live(key, now) {
            return false;
        }
        if deadline <= now {
            self.map.remove(key);
            return true;
        }
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &[u8], now: Instant) -> TtlStatus {
        if !self.live(key, now) {
            return TtlStatus::Missing;
        }
        match self.map.get(key).and_then(|entry| entry.expires_at) {
            Some(deadline) => TtlStatus::ExpiresIn(deadline.saturating_duration_since(now)),
            None => TtlStatus::NoExpiry,
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Number of stored keys, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        before - self.map.len()
    }
}

/// All databases of one store instance.
#[derive(Debug)]
pub struct Keyspace {
    databases: Vec<Database>,
}

impl Keyspace {
    pub fn new(databases: usize) -> Self {
        let hash_state = RandomState::new();
        let databases = (0..databases.max(1))
            .map(|_| Database::new(hash_state.clone()))
            .collect();
        Keyspace { databases }
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Database by index; `None` when out of range.
    pub fn db(&mut self, index: usize) -> Option<&mut Database> {
        self.databases.get_mut(index)
    }

    pub fn flush_all(&mut self) {
        for db in &mut self.databases {
            db.clear();
        }
    }

    /// Removes expired entries across all databases.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        self.databases.iter_mut().map(|db| db.purge_expired(now)).sum()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Keyspace::new(DEFAULT_DATABASES)
    }
}
