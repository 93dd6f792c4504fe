//! # KVC Store Client
//!
//! Purpose: Provide a lightweight, synchronous RESP2 connection to a
//! Redis-compatible store that can forward any command verb.
//!
//! ## Design Principles
//! 1. **Lazy Connection**: One socket per connection, opened on first use.
//! 2. **Generic Forwarding**: Commands are data; no per-verb methods.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod batch;
mod command;
mod config;
mod connection;
mod error;
mod resp;
mod transport;

pub use batch::{Batch, BatchMode};
pub use command::{cmd, Arg, Command, ToArg};
pub use config::{
    ConnectionConfig, Endpoint, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use connection::StoreConnection;
pub use error::{StoreError, StoreResult};
pub use resp::Reply;
pub use transport::idle_persistent;
