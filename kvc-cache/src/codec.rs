//! # Value Codecs
//!
//! Purpose: Turn arbitrary serde values into the opaque byte payloads the
//! store holds, and back.
//!
//! ## Notes
//! - `BincodeCodec` is compact and length-prefixed; it is the default.
//! - `JsonCodec` trades size for payloads other tools can read.
//! - Decoding never falls back to a default value; a mismatch is an error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Codec failure message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Reversible encoding of values to store payloads.
pub trait ValueCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Binary codec backed by `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl ValueCodec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|err| CodecError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|err| CodecError(err.to_string()))
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError(err.to_string()))
    }
}
