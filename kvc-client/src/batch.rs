//! # Batched Command Groups
//!
//! Purpose: Queue several commands and execute them in one round trip,
//! either as a plain pipeline or as an atomic MULTI/EXEC transaction.
//!
//! ## Notes
//! - Nothing is sent until `commit`; dropping a batch discards it.
//! - Replies come back in submission order. Atomic mode relies on the store
//!   executing queued commands in that same order.

use std::iter;

use tracing::trace;

use crate::command::{cmd, Command};
use crate::connection::StoreConnection;
use crate::error::{StoreError, StoreResult};
use crate::resp::Reply;

/// How a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Commands are written together; each runs independently.
    Pipeline,
    /// Commands run as one MULTI/EXEC unit.
    Atomic,
}

/// Commands queued against a connection.
pub struct Batch<'c> {
    conn: &'c mut StoreConnection,
    mode: BatchMode,
    queued: Vec<Command>,
}

impl<'c> Batch<'c> {
    pub(crate) fn new(conn: &'c mut StoreConnection, mode: BatchMode) -> Self {
        Batch {
            conn,
            mode,
            queued: Vec::new(),
        }
    }

    /// Queues a command instead of executing it.
    pub fn invoke(&mut self, command: Command) -> &mut Self {
        self.queued.push(command);
        self
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Executes the queued commands and returns one reply per command.
    ///
    /// Pipeline mode hands back error replies as data. Atomic mode fails as a
    /// whole when the store refuses to queue a command or aborts EXEC.
    pub fn commit(self) -> StoreResult<Vec<Reply>> {
        if self.queued.is_empty() {
            return Ok(Vec::new());
        }
        trace!(mode = ?self.mode, commands = self.queued.len(), "committing batch");
        match self.mode {
            BatchMode::Pipeline => self.conn.exchange(self.queued.iter(), self.queued.len()),
            BatchMode::Atomic => commit_atomic(self.conn, &self.queued),
        }
    }
}

fn commit_atomic(conn: &mut StoreConnection, queued: &[Command]) -> StoreResult<Vec<Reply>> {
    let multi = cmd("MULTI");
    let exec = cmd("EXEC");
    let commands = iter::once(&multi).chain(queued.iter()).chain(iter::once(&exec));
    let mut replies = conn.exchange(commands, queued.len() + 2)?.into_iter();

    match replies.next() {
        Some(reply) if reply.is_ok() => {}
        Some(Reply::Error(message)) => return Err(StoreError::remote("MULTI", &message)),
        _ => return Err(StoreError::unexpected("MULTI")),
    }

    let mut refused = None;
    for command in queued {
        match replies.next() {
            Some(Reply::Status(_)) => {}
            Some(Reply::Error(message)) => {
                if refused.is_none() {
                    refused = Some(StoreError::remote(command.name(), &message));
                }
            }
            _ => return Err(StoreError::unexpected(command.name())),
        }
    }

    let exec_reply = replies.next();
    if let Some(err) = refused {
        return Err(err);
    }
    match exec_reply {
        Some(Reply::Array(results)) if results.len() == queued.len() => Ok(results),
        Some(Reply::Array(_)) => Err(StoreError::Protocol(
            "EXEC returned a different number of results than were queued".to_string(),
        )),
        Some(Reply::Nil) => Err(StoreError::BatchAborted),
        Some(Reply::Error(message)) => Err(StoreError::remote("EXEC", &message)),
        _ => Err(StoreError::unexpected("EXEC")),
    }
}
