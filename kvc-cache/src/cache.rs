//! # Cache Layer
//!
//! Purpose: Translate cache operations into store commands over one
//! [`StoreConnection`], owning serialization and TTL policy.
//!
//! ## Design Principles
//! 1. **Thin Translation**: One operation maps to one round trip.
//! 2. **Fail Fast**: Store errors propagate unchanged; nothing retries.
//! 3. **Expiry Misses Are Data**: `set_many` reports keys whose expiry was
//!    not applied instead of failing the whole write.

use std::collections::HashMap;
use std::time::Duration;

use kvc_client::{cmd, BatchMode, Reply, StoreConnection, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, warn};

use crate::codec::{BincodeCodec, ValueCodec};
use crate::contract::{BatchResult, CacheContract};
use crate::error::{CacheError, CacheResult};
use crate::key::CacheConfig;
use crate::ttl::ttl_to_millis;

/// Cache operations backed by a single store connection.
pub struct CacheLayer<C: ValueCodec = BincodeCodec> {
    conn: StoreConnection,
    config: CacheConfig,
    codec: C,
}

impl CacheLayer<BincodeCodec> {
    pub fn new(conn: StoreConnection, config: CacheConfig) -> Self {
        CacheLayer::with_codec(conn, config, BincodeCodec)
    }
}

impl<C: ValueCodec> CacheLayer<C> {
    pub fn with_codec(conn: StoreConnection, config: CacheConfig, codec: C) -> Self {
        CacheLayer { conn, config, codec }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying connection, for commands the cache does not wrap.
    pub fn connection_mut(&mut self) -> &mut StoreConnection {
        &mut self.conn
    }

    pub fn into_connection(self) -> StoreConnection {
        self.conn
    }

    /// Returns the cached value, or computes, stores and returns it.
    ///
    /// A failed write of the computed value is logged and the value is
    /// still returned.
    pub fn get_or_set<T, F>(&mut self, key: &str, ttl: Duration, produce: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = produce();
        match self.set(key, &value, ttl) {
            Ok(true) => {}
            Ok(false) => warn!(key, "store did not acknowledge computed value"),
            Err(err) => warn!(key, error = %err, "failed to store computed value"),
        }
        Ok(value)
    }

    /// `add` for each item; reports the keys that were not added.
    pub fn add_many<T: Serialize, K: AsRef<str>>(
        &mut self,
        items: &[(K, T)],
        ttl: Duration,
    ) -> CacheResult<BatchResult> {
        let mut result = BatchResult::default();
        for (key, value) in items {
            if !self.add(key.as_ref(), value, ttl)? {
                result.push(key.as_ref());
            }
        }
        Ok(result)
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>> {
        self.codec
            .encode(value)
            .map_err(|err| CacheError::Serialization(err.0))
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> CacheResult<T> {
        self.codec
            .decode(bytes)
            .map_err(|err| CacheError::Deserialization {
                key: key.to_string(),
                reason: err.0,
            })
    }

    fn decode_reply<T: DeserializeOwned>(
        &self,
        command: &str,
        key: &str,
        reply: Reply,
    ) -> CacheResult<Option<T>> {
        match reply {
            Reply::Bulk(Some(bytes)) => self.decode(key, &bytes).map(Some),
            Reply::Bulk(None) | Reply::Nil => Ok(None),
            _ => Err(unexpected(command)),
        }
    }
}

impl<C: ValueCodec> CacheContract for CacheLayer<C> {
    fn get<T: DeserializeOwned>(&mut self, key: &str) -> CacheResult<Option<T>> {
        let store_key = self.config.build_key(key);
        let reply = self.conn.invoke(&cmd("GET").key(store_key))?;
        self.decode_reply("GET", key, reply)
    }

    fn get_many<T: DeserializeOwned, K: AsRef<str>>(
        &mut self,
        keys: &[K],
    ) -> CacheResult<HashMap<String, Option<T>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let store_keys = keys.iter().map(|key| self.config.build_key(key.as_ref()));
        let reply = self.conn.invoke(&cmd("MGET").keys(store_keys))?;
        let Reply::Array(values) = reply else {
            return Err(unexpected("MGET"));
        };
        if values.len() != keys.len() {
            return Err(StoreError::Protocol(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            ))
            .into());
        }

        let mut found = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let key = key.as_ref();
            let decoded = self.decode_reply("MGET", key, value)?;
            found.insert(key.to_string(), decoded);
        }
        Ok(found)
    }

    fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool> {
        let payload = self.encode(value)?;
        let mut command = cmd("SET").key(self.config.build_key(key)).arg(payload);
        if let Some(millis) = ttl_to_millis(ttl) {
            command = command.arg("PX").arg(millis);
        }
        Ok(self.conn.invoke(&command)?.is_ok())
    }

    fn set_many<T: Serialize, K: AsRef<str>>(
        &mut self,
        items: &[(K, T)],
        ttl: Duration,
    ) -> CacheResult<BatchResult> {
        let mut result = BatchResult::default();
        if items.is_empty() {
            return Ok(result);
        }

        let mut mset = cmd("MSET");
        let mut store_keys = Vec::with_capacity(items.len());
        for (key, value) in items {
            let store_key = self.config.build_key(key.as_ref());
            mset = mset.key(store_key.as_str()).arg(self.encode(value)?);
            store_keys.push(store_key);
        }

        let Some(millis) = ttl_to_millis(ttl) else {
            let reply = self.conn.invoke(&mset)?;
            if !reply.is_ok() {
                return Err(unexpected("MSET"));
            }
            return Ok(result);
        };

        let mut batch = self.conn.begin_batch(BatchMode::Atomic);
        batch.invoke(mset);
        for store_key in store_keys {
            batch.invoke(cmd("PEXPIRE").key(store_key).arg(millis));
        }
        let replies = batch.commit()?;
        trace!(keys = items.len(), ttl_ms = millis, "committed batch write");

        // The first reply belongs to MSET; the rest line up with the keys.
        for ((key, _), reply) in items.iter().zip(replies.into_iter().skip(1)) {
            if reply.as_integer() != Some(1) {
                warn!(key = key.as_ref(), reply = ?reply, "key missed its expiry in batch write");
                result.push(key.as_ref());
            }
        }
        Ok(result)
    }

    fn add<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool> {
        let payload = self.encode(value)?;
        let store_key = self.config.build_key(key);
        match ttl_to_millis(ttl) {
            None => {
                let reply = self.conn.invoke(&cmd("SETNX").key(store_key).arg(payload))?;
                Ok(reply.as_integer() == Some(1))
            }
            Some(millis) => {
                let command = cmd("SET").key(store_key).arg(payload).arg("PX").arg(millis).arg("NX");
                Ok(self.conn.invoke(&command)?.is_ok())
            }
        }
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let reply = self.conn.invoke(&cmd("DEL").key(self.config.build_key(key)))?;
        integer_flag("DEL", reply)
    }

    fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let reply = self.conn.invoke(&cmd("EXISTS").key(self.config.build_key(key)))?;
        integer_flag("EXISTS", reply)
    }

    fn flush_all(&mut self) -> CacheResult<bool> {
        Ok(self.conn.invoke(&cmd("FLUSHDB"))?.is_ok())
    }
}

fn integer_flag(command: &str, reply: Reply) -> CacheResult<bool> {
    reply
        .as_integer()
        .map(|count| count > 0)
        .ok_or_else(|| unexpected(command))
}

fn unexpected(command: &str) -> CacheError {
    CacheError::Store(StoreError::UnexpectedReply {
        command: command.to_string(),
    })
}
