//! # KVC Cache
//!
//! Purpose: Key/value cache semantics (get, set with TTL, batch writes,
//! conditional add) over a remote RESP store.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use kvc_cache::{CacheConfig, CacheContract, CacheLayer};
//! use kvc_client::{ConnectionConfig, StoreConnection};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = StoreConnection::new(ConnectionConfig::tcp("127.0.0.1", 6379))?;
//! let mut cache = CacheLayer::new(conn, CacheConfig::default());
//! cache.set("greeting", "hello", Duration::from_secs(60))?;
//! let value: Option<String> = cache.get("greeting")?;
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod codec;
mod contract;
mod error;
mod key;
mod ttl;

pub use cache::CacheLayer;
pub use codec::{BincodeCodec, CodecError, JsonCodec, ValueCodec};
pub use contract::{BatchResult, CacheContract};
pub use error::{CacheError, CacheResult};
pub use key::{build_key, CacheConfig, MAX_PLAIN_KEY_LEN};
pub use ttl::ttl_to_millis;
