//! # Cache Keys
//!
//! Caller keys are mapped to store keys before every operation. Short
//! alphanumeric keys are kept readable; anything else is hashed so arbitrary
//! input never produces oversized or awkward store keys.

use serde::{Deserialize, Serialize};

/// Longest caller key stored verbatim.
pub const MAX_PLAIN_KEY_LEN: usize = 32;

/// Cache layer settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prepended to every built key, on top of the connection's prefix.
    pub key_prefix: String,
}

impl CacheConfig {
    pub fn with_prefix(key_prefix: impl Into<String>) -> Self {
        CacheConfig {
            key_prefix: key_prefix.into(),
        }
    }

    /// Reads `KVC_CACHE_KEY_PREFIX` over the defaults.
    pub fn from_env() -> Self {
        let mut config = CacheConfig::default();
        if let Ok(prefix) = std::env::var("KVC_CACHE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        config
    }

    /// Store key for a caller key.
    pub fn build_key(&self, key: &str) -> String {
        build_key(&self.key_prefix, key)
    }
}

/// `prefix + key` for short alphanumeric keys, `prefix + md5(key)` otherwise.
pub fn build_key(prefix: &str, key: &str) -> String {
    let plain = !key.is_empty()
        && key.len() <= MAX_PLAIN_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_alphanumeric());
    if plain {
        format!("{}{}", prefix, key)
    } else {
        format!("{}{:x}", prefix, md5::compute(key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_alphanumeric_keys_stay_readable() {
        assert_eq!(build_key("app_", "user42"), "app_user42");
        assert_eq!(build_key("", "A1"), "A1");
    }

    #[test]
    fn other_keys_are_hashed() {
        assert_eq!(build_key("", "a:b"), format!("{:x}", md5::compute(b"a:b")));
        assert_eq!(build_key("p_", ""), format!("p_{:x}", md5::compute(b"")));
    }

    #[test]
    fn long_keys_are_hashed() {
        let exact = "a".repeat(MAX_PLAIN_KEY_LEN);
        assert_eq!(build_key("", &exact), exact);

        let long = "a".repeat(MAX_PLAIN_KEY_LEN + 1);
        let built = build_key("x", &long);
        assert_eq!(built.len(), 1 + 32);
        assert!(built.starts_with('x'));
    }

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(build_key("", "hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(CacheConfig::with_prefix("v2_").build_key("k"), "v2_k");
    }
}
