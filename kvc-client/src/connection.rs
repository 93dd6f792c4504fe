//! # Store Connection
//!
//! Purpose: Manage exactly one lazy, reusable connection to the store and
//! forward arbitrary commands to it.
//!
//! ## Design Principles
//! 1. **Lazy Open**: Nothing touches the network until the first command.
//! 2. **Generic Forwarding**: `invoke` never special-cases a verb.
//! 3. **Fail Fast**: Errors surface immediately; there is no reconnect loop.
//! 4. **Single Owner**: Mutating calls take `&mut self`, so sharing across
//!    threads needs an explicit lock around the whole connection.
//!
//! ## State Machine
//!
//! ```text
//! Unopened --open ok--> Open --close--> Unopened
//! Open --open--> Open (no-op)
//! Open --transport failure--> Open(broken) --close--> Unopened
//! ```

use std::iter;

use tracing::{debug, trace};

use crate::batch::{Batch, BatchMode};
use crate::command::{cmd, Command};
use crate::config::{ConnectionConfig, Endpoint};
use crate::error::{StoreError, StoreResult};
use crate::resp::{Reply, RespError};
use crate::transport::{self, PersistentKey, Socket};

/// Lazily opened connection to the store.
pub struct StoreConnection {
    config: ConnectionConfig,
    endpoint: Endpoint,
    socket: Option<Socket>,
    broken: bool,
}

impl StoreConnection {
    /// Creates an unopened connection after validating `config`.
    pub fn new(config: ConnectionConfig) -> StoreResult<Self> {
        config.validate()?;
        let endpoint = config.endpoint();
        Ok(StoreConnection {
            config,
            endpoint,
            socket: None,
            broken: false,
        })
    }

    /// Configuration this connection was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens the connection if it is not open yet.
    ///
    /// A fresh session is authenticated and switched to the configured
    /// database before any caller traffic. Persistent mode first reuses an
    /// idle socket for the same endpoint, database and credentials.
    pub fn open(&mut self) -> StoreResult<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        if self.config.persistent {
            if let Some(socket) = self.reuse_persistent() {
                debug!(endpoint = %self.endpoint, "reusing persistent store socket");
                self.socket = Some(socket);
                self.broken = false;
                return Ok(());
            }
        }

        let mut socket = Socket::connect(&self.config).map_err(|source| StoreError::Connection {
            endpoint: self.endpoint.to_string(),
            source,
        })?;
        self.prepare_session(&mut socket)?;

        debug!(
            endpoint = %self.endpoint,
            database = self.config.database,
            persistent = self.config.persistent,
            "opened store connection"
        );
        self.socket = Some(socket);
        self.broken = false;
        Ok(())
    }

    /// Whether a connection handle exists. Does not probe the network.
    pub fn is_active(&self) -> bool {
        self.socket.is_some()
    }

    /// Releases the handle; the next command reopens implicitly.
    pub fn close(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        if self.config.persistent && !self.broken {
            transport::checkin(PersistentKey::for_config(&self.config), socket);
            debug!(endpoint = %self.endpoint, "parked persistent store socket");
        } else {
            socket.shutdown();
            debug!(endpoint = %self.endpoint, "closed store connection");
        }
        self.broken = false;
    }

    /// Forwards one command and returns its raw reply.
    ///
    /// An error reply from the store becomes [`StoreError::RemoteCommand`]
    /// carrying the command name.
    pub fn invoke(&mut self, command: &Command) -> StoreResult<Reply> {
        trace!(command = command.name(), args = command.args().len(), "forwarding command");
        let mut replies = self.exchange(iter::once(command), 1)?;
        match replies.pop() {
            Some(Reply::Error(message)) => Err(StoreError::remote(command.name(), &message)),
            Some(reply) => Ok(reply),
            None => Err(StoreError::unexpected(command.name())),
        }
    }

    /// Starts a best-effort pipeline.
    pub fn pipeline(&mut self) -> Batch<'_> {
        self.begin_batch(BatchMode::Pipeline)
    }

    /// Starts a batched command group in the given mode.
    pub fn begin_batch(&mut self, mode: BatchMode) -> Batch<'_> {
        Batch::new(self, mode)
    }

    /// Round-trips a PING. True when the store answered PONG.
    pub fn ping(&mut self) -> StoreResult<bool> {
        let reply = self.invoke(&cmd("PING"))?;
        Ok(matches!(reply, Reply::Status(ref text) if text == b"PONG"))
    }

    /// Sends `commands` in one write and reads `expected` replies in order.
    pub(crate) fn exchange<'a, I>(&mut self, commands: I, expected: usize) -> StoreResult<Vec<Reply>>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        self.open()?;
        if self.broken {
            return Err(StoreError::Broken {
                endpoint: self.endpoint.to_string(),
            });
        }

        let result = match self.socket.as_mut() {
            Some(socket) => roundtrip(socket, commands, expected, self.config.key_prefix.as_bytes()),
            None => {
                return Err(StoreError::Broken {
                    endpoint: self.endpoint.to_string(),
                })
            }
        };
        result.map_err(|err| {
            // The stream position is unknown after a failure; never reuse it.
            self.broken = true;
            self.resp_error(err)
        })
    }

    /// Takes a parked socket and re-selects the configured database on it.
    ///
    /// A previous owner may have switched databases through `invoke`; the
    /// SELECT restores the session and doubles as a liveness check.
    fn reuse_persistent(&self) -> Option<Socket> {
        let key = PersistentKey::for_config(&self.config);
        let select = cmd("SELECT").arg(self.config.database);
        while let Some(mut socket) = transport::checkout(&key) {
            match roundtrip(&mut socket, iter::once(&select), 1, b"") {
                Ok(replies) if replies.first().is_some_and(Reply::is_ok) => return Some(socket),
                _ => socket.shutdown(),
            }
        }
        None
    }

    fn prepare_session(&self, socket: &mut Socket) -> StoreResult<()> {
        if let Some(password) = &self.config.password {
            let auth = cmd("AUTH").arg(password);
            if let Reply::Error(message) = self.session_command(socket, &auth)? {
                return Err(StoreError::AuthRejected {
                    endpoint: self.endpoint.to_string(),
                    message: String::from_utf8_lossy(&message).into_owned(),
                });
            }
        }

        if self.config.database > 0 {
            let select = cmd("SELECT").arg(self.config.database);
            if let Reply::Error(message) = self.session_command(socket, &select)? {
                return Err(StoreError::remote("SELECT", &message));
            }
        }
        Ok(())
    }

    fn session_command(&self, socket: &mut Socket, command: &Command) -> StoreResult<Reply> {
        let mut replies =
            roundtrip(socket, iter::once(command), 1, b"").map_err(|err| self.resp_error(err))?;
        replies.pop().ok_or_else(|| StoreError::unexpected(command.name()))
    }

    fn resp_error(&self, err: RespError) -> StoreError {
        match err {
            RespError::Io(source) => StoreError::Connection {
                endpoint: self.endpoint.to_string(),
                source,
            },
            RespError::Protocol(message) => StoreError::Protocol(message.to_string()),
        }
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn roundtrip<'a, I>(
    socket: &mut Socket,
    commands: I,
    expected: usize,
    key_prefix: &[u8],
) -> Result<Vec<Reply>, RespError>
where
    I: IntoIterator<Item = &'a Command>,
{
    socket.send(commands, key_prefix)?;
    let mut replies = Vec::with_capacity(expected);
    for _ in 0..expected {
        replies.push(socket.receive()?);
    }
    Ok(replies)
}
