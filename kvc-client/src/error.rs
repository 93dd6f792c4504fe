//! # Store Errors
//!
//! Every failure the connection layer can surface. Errors propagate to the
//! immediate caller unchanged; nothing in this crate retries.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by [`StoreConnection`](crate::StoreConnection).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection parameters are invalid or unusable on this platform.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The socket could not be established or the transport failed.
    #[error("connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The store rejected the configured password.
    #[error("authentication rejected by {endpoint}: {message}")]
    AuthRejected { endpoint: String, message: String },

    /// A previous transport failure left the handle unusable.
    #[error("connection to {endpoint} is broken; close it before reuse")]
    Broken { endpoint: String },

    /// The store answered a command with an error reply.
    #[error("{command} failed: {message}")]
    RemoteCommand { command: String, message: String },

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Reply type did not match what the command returns.
    #[error("unexpected reply to {command}")]
    UnexpectedReply { command: String },

    /// EXEC returned a null reply and nothing in the batch ran.
    #[error("atomic batch aborted by the store")]
    BatchAborted,
}

impl StoreError {
    pub(crate) fn remote(command: &str, message: &[u8]) -> Self {
        StoreError::RemoteCommand {
            command: command.to_string(),
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }

    pub(crate) fn unexpected(command: &str) -> Self {
        StoreError::UnexpectedReply {
            command: command.to_string(),
        }
    }

    /// Returns the command name for errors tied to a single command.
    pub fn command(&self) -> Option<&str> {
        match self {
            StoreError::RemoteCommand { command, .. } | StoreError::UnexpectedReply { command } => {
                Some(command)
            }
            _ => None,
        }
    }

    /// True when the failure happened below the command layer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::AuthRejected { .. } | StoreError::Broken { .. }
        )
    }
}
