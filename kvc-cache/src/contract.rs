//! The operations every cache backend offers.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheResult;

/// Keys whose requested expiry was not applied during a batch write.
///
/// Empty means every key received its expiry. Keys are listed in input
/// order, as the caller passed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    failed: Vec<String>,
}

impl BatchResult {
    pub(crate) fn push(&mut self, key: impl Into<String>) {
        self.failed.push(key.into());
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_keys(&self) -> &[String] {
        &self.failed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.failed.iter().any(|failed| failed == key)
    }

    pub fn into_failed_keys(self) -> Vec<String> {
        self.failed
    }
}

/// Cache semantics over some backing store.
///
/// A `ttl` of zero means the entry never expires.
pub trait CacheContract {
    /// Value stored under `key`, or `None` when absent.
    fn get<T: DeserializeOwned>(&mut self, key: &str) -> CacheResult<Option<T>>;

    /// Values for all `keys` in one round trip.
    fn get_many<T: DeserializeOwned, K: AsRef<str>>(
        &mut self,
        keys: &[K],
    ) -> CacheResult<HashMap<String, Option<T>>>;

    /// Stores `value`; true when the store acknowledged the write.
    fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool>;

    /// Stores every item; reports keys that missed their expiry.
    fn set_many<T: Serialize, K: AsRef<str>>(
        &mut self,
        items: &[(K, T)],
        ttl: Duration,
    ) -> CacheResult<BatchResult>;

    /// Stores `value` only if `key` is absent.
    fn add<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool>;

    /// True when a key was removed.
    fn delete(&mut self, key: &str) -> CacheResult<bool>;

    /// Presence check that never fetches the value.
    ///
    /// A true answer does not promise a later `get` finds the value.
    fn exists(&mut self, key: &str) -> CacheResult<bool>;

    /// Removes every key in the selected database.
    fn flush_all(&mut self) -> CacheResult<bool>;
}
