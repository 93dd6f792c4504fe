//! # RESP Server
//!
//! Accept RESP2 connections over TCP or unix sockets, parse commands, and
//! dispatch them against the shared keyspace.
//!
//! ## Notes
//! - Connection state (auth, selected database, open MULTI queue) lives in a
//!   per-connection `Session`.
//! - Queued MULTI commands are validated on arrival and executed under one
//!   keyspace lock on EXEC.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::keyspace::{Database, Keyspace, TtlStatus};
use crate::protocol::{
    resp_array, resp_bulk, resp_error, resp_integer, resp_null, resp_ok, resp_simple, RespError,
    RespParser,
};

/// How often untouched expired keys are reclaimed.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Called with the keyspace, the selected database and the command
/// arguments right before a data command executes, including each command
/// inside EXEC. Lets tests inject faults such as a key vanishing mid-batch.
pub type CommandHook = Box<dyn Fn(&mut Keyspace, usize, &[Vec<u8>]) + Send + Sync>;

/// State shared by every connection.
pub struct Shared {
    keyspace: Mutex<Keyspace>,
    password: Option<String>,
    hook: RwLock<Option<CommandHook>>,
}

impl Shared {
    pub fn new(databases: usize, password: Option<String>) -> Arc<Self> {
        Arc::new(Shared {
            keyspace: Mutex::new(Keyspace::new(databases)),
            password,
            hook: RwLock::new(None),
        })
    }

    /// Runs `f` with the keyspace locked.
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        f(&mut self.keyspace.lock())
    }

    /// Installs a hook run before every data command; replaces any previous one.
    pub fn set_command_hook<F>(&self, hook: F)
    where
        F: Fn(&mut Keyspace, usize, &[Vec<u8>]) + Send + Sync + 'static,
    {
        *self.hook.write() = Some(Box::new(hook));
    }

    pub fn clear_command_hook(&self) {
        *self.hook.write() = None;
    }

    fn run(&self, keyspace: &mut Keyspace, db: usize, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
        if let Some(hook) = self.hook.read().as_ref() {
            hook(keyspace, db, args);
        }
        execute(keyspace, db, name, args)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("keyspace", &self.keyspace)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("hook", &self.hook.read().is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Session {
    authenticated: bool,
    db: usize,
    queue: Option<Vec<Vec<Vec<u8>>>>,
    queue_failed: bool,
}

impl Session {
    fn new(shared: &Shared) -> Self {
        Session {
            authenticated: shared.password.is_none(),
            db: 0,
            queue: None,
            queue_failed: false,
        }
    }
}

/// Accepts TCP clients until `shutdown` resolves.
pub async fn serve_tcp(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%peer, "accepted tcp client");
                    tokio::spawn(run_client(stream, Arc::clone(&shared)));
                }
                Err(err) => warn!(error = %err, "tcp accept failed"),
            },
            _ = &mut shutdown => return Ok(()),
        }
    }
}

/// Accepts unix socket clients until `shutdown` resolves.
#[cfg(unix)]
pub async fn serve_unix(
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("accepted unix client");
                    tokio::spawn(run_client(stream, Arc::clone(&shared)));
                }
                Err(err) => warn!(error = %err, "unix accept failed"),
            },
            _ = &mut shutdown => return Ok(()),
        }
    }
}

/// Periodically reclaims expired keys until `shutdown` resolves.
pub async fn sweep_expired(shared: Arc<Shared>, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = shared.with_keyspace(|keyspace| keyspace.purge_expired(Instant::now()));
                if removed > 0 {
                    debug!(removed, "swept expired keys");
                }
            }
            _ = &mut shutdown => return,
        }
    }
}

async fn run_client<S>(stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = handle_connection(stream, shared).await {
        debug!(error = %err, "client connection ended with error");
    }
}

/// Handles a single client connection.
pub async fn handle_connection<S>(mut stream: S, shared: Arc<Shared>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session::new(&shared);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        let mut out = Vec::new();
        let mut quit = false;
        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) if args.is_empty() => {}
                Ok(Some(args)) => {
                    if args[0].eq_ignore_ascii_case(b"QUIT") {
                        out.extend_from_slice(&resp_ok());
                        quit = true;
                        break;
                    }
                    out.extend_from_slice(&dispatch(&shared, &mut session, &args));
                }
                Ok(None) => break,
                Err(RespError::Protocol(reason)) => {
                    warn!(reason, "closing client after protocol error");
                    out.extend_from_slice(&resp_error(&format!("ERR Protocol error: {}", reason)));
                    quit = true;
                    break;
                }
            }
        }
        // Replies for a pipelined burst go out in one write.
        stream.write_all(&out).await?;
        if quit {
            break;
        }
    }

    Ok(())
}

fn dispatch(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Vec<u8> {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    if name == "AUTH" {
        return handle_auth(shared, session, args);
    }
    if !session.authenticated {
        return resp_error("NOAUTH Authentication required.");
    }

    if session.queue.is_some() {
        return match name.as_str() {
            "EXEC" => handle_exec(shared, session),
            "DISCARD" => {
                session.queue = None;
                session.queue_failed = false;
                resp_ok()
            }
            "MULTI" => resp_error("ERR MULTI calls can not be nested"),
            _ => queue_command(session, &name, args),
        };
    }

    match name.as_str() {
        "MULTI" => {
            session.queue = Some(Vec::new());
            session.queue_failed = false;
            resp_ok()
        }
        "EXEC" => resp_error("ERR EXEC without MULTI"),
        "DISCARD" => resp_error("ERR DISCARD without MULTI"),
        "SELECT" => handle_select(shared, session, args),
        _ => {
            if let Err(reply) = check_arity(&name, args.len()) {
                return reply;
            }
            shared.with_keyspace(|keyspace| shared.run(keyspace, session.db, &name, args))
        }
    }
}

fn queue_command(session: &mut Session, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
    if let Err(reply) = check_arity(name, args.len()) {
        session.queue_failed = true;
        return reply;
    }
    if let Some(queue) = session.queue.as_mut() {
        queue.push(args.to_vec());
    }
    resp_simple("QUEUED")
}

fn handle_auth(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("auth");
    }
    match &shared.password {
        None => resp_error("ERR AUTH called without any password configured"),
        Some(password) if password.as_bytes() == args[1].as_slice() => {
            session.authenticated = true;
            resp_ok()
        }
        Some(_) => resp_error("WRONGPASS invalid username-password pair"),
    }
}

fn handle_select(shared: &Shared, session: &mut Session, args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("select");
    }
    let index = match parse_i64(&args[1]) {
        Ok(value) => value,
        Err(reply) => return reply,
    };
    let count = shared.with_keyspace(|keyspace| keyspace.database_count());
    if index < 0 || index as usize >= count {
        return resp_error("ERR DB index is out of range");
    }
    session.db = index as usize;
    resp_ok()
}

fn handle_exec(shared: &Shared, session: &mut Session) -> Vec<u8> {
    let queue = session.queue.take().unwrap_or_default();
    if std::mem::take(&mut session.queue_failed) {
        return resp_error("EXECABORT Transaction discarded because of previous errors.");
    }

    let db = session.db;
    let replies: Vec<Vec<u8>> = shared.with_keyspace(|keyspace| {
        queue
            .iter()
            .map(|args| {
                let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                shared.run(keyspace, db, &name, args)
            })
            .collect()
    });
    resp_array(replies)
}

/// Known data commands and their arity (negative = at least).
const COMMANDS: &[(&str, i32)] = &[
    ("PING", -1),
    ("ECHO", 2),
    ("GET", 2),
    ("MGET", -2),
    ("SET", -3),
    ("SETNX", 3),
    ("MSET", -3),
    ("DEL", -2),
    ("EXISTS", -2),
    ("EXPIRE", 3),
    ("PEXPIRE", 3),
    ("TTL", 2),
    ("PTTL", 2),
    ("DBSIZE", 1),
    ("FLUSHDB", -1),
    ("FLUSHALL", -1),
    ("INFO", -1),
];

fn check_arity(name: &str, argc: usize) -> Result<(), Vec<u8>> {
    let Some(&(_, arity)) = COMMANDS.iter().find(|(known, _)| *known == name) else {
        return Err(resp_error(&format!("ERR unknown command '{}'", name.to_ascii_lowercase())));
    };
    let argc = argc as i32;
    let valid = if arity >= 0 { argc == arity } else { argc >= -arity };
    if !valid || (name == "MSET" && argc % 2 == 0) {
        return Err(wrong_arity(&name.to_ascii_lowercase()));
    }
    Ok(())
}

fn execute(keyspace: &mut Keyspace, db_index: usize, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
    let now = Instant::now();
    if name == "FLUSHALL" {
        keyspace.flush_all();
        return resp_ok();
    }
    let Some(db) = keyspace.db(db_index) else {
        return resp_error("ERR DB index is out of range");
    };

    match name {
        "PING" => match args.len() {
            1 => resp_simple("PONG"),
            _ => resp_bulk(&args[1]),
        },
        "ECHO" => resp_bulk(&args[1]),
        "GET" => match db.get(&args[1], now) {
            Some(value) => resp_bulk(value),
            None => resp_null(),
        },
        "MGET" => resp_array(
            args[1..]
                .iter()
                .map(|key| db.get(key, now).map(resp_bulk).unwrap_or_else(resp_null))
                .collect(),
        ),
        "SET" => handle_set(db, args, now),
        "SETNX" => {
            if db.contains(&args[1], now) {
                resp_integer(0)
            } else {
                db.set(args[1].clone(), args[2].clone(), None);
                resp_integer(1)
            }
        }
        "MSET" => {
            for pair in args[1..].chunks(2) {
                db.set(pair[0].clone(), pair[1].clone(), None);
            }
            resp_ok()
        }
        "DEL" => resp_integer(args[1..].iter().filter(|key| db.remove(key, now)).count() as i64),
        "EXISTS" => resp_integer(args[1..].iter().filter(|key| db.contains(key, now)).count() as i64),
        "EXPIRE" | "PEXPIRE" => {
            let amount = match parse_i64(&args[2]) {
                Ok(value) => value,
                Err(reply) => return reply,
            };
            let ttl = if name == "EXPIRE" {
                Duration::from_secs(amount.max(0) as u64)
            } else {
                Duration::from_millis(amount.max(0) as u64)
            };
            resp_integer(db.expire_at(&args[1], now + ttl, now) as i64)
        }
        "TTL" | "PTTL" => match db.ttl(&args[1], now) {
            TtlStatus::Missing => resp_integer(-2),
            TtlStatus::NoExpiry => resp_integer(-1),
            TtlStatus::ExpiresIn(remaining) if name == "TTL" => {
                resp_integer(remaining.as_secs() as i64)
            }
            TtlStatus::ExpiresIn(remaining) => resp_integer(remaining.as_millis() as i64),
        },
        "DBSIZE" => resp_integer(db.len() as i64),
        "FLUSHDB" => {
            db.clear();
            resp_ok()
        }
        "INFO" => resp_bulk(b"# Server\r\nrole:master\r\nengine:kvc-devstore\r\n"),
        _ => resp_error(&format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
    }
}

fn handle_set(db: &mut Database, args: &[Vec<u8>], now: Instant) -> Vec<u8> {
    let mut only_if_absent = false;
    let mut only_if_present = false;
    let mut ttl = None;

    let mut idx = 3;
    while idx < args.len() {
        let option = args[idx].to_ascii_uppercase();
        match option.as_slice() {
            b"NX" => only_if_absent = true,
            b"XX" => only_if_present = true,
            b"EX" | b"PX" => {
                let Some(raw) = args.get(idx + 1) else {
                    return resp_error("ERR syntax error");
                };
                let amount = match parse_i64(raw) {
                    Ok(value) => value,
                    Err(reply) => return reply,
                };
                if amount <= 0 {
                    return resp_error("ERR invalid expire time in 'set' command");
                }
                ttl = Some(if option == b"EX" {
                    Duration::from_secs(amount as u64)
                } else {
                    Duration::from_millis(amount as u64)
                });
                idx += 1;
            }
            _ => return resp_error("ERR syntax error"),
        }
        idx += 1;
    }
    if only_if_absent && only_if_present {
        return resp_error("ERR syntax error");
    }

    let exists = db.contains(&args[1], now);
    if (only_if_absent && exists) || (only_if_present && !exists) {
        return resp_null();
    }
    db.set(args[1].clone(), args[2].clone(), ttl.map(|ttl| now + ttl));
    resp_ok()
}

fn wrong_arity(command: &str) -> Vec<u8> {
    resp_error(&format!("ERR wrong number of arguments for '{}' command", command))
}

fn parse_i64(arg: &[u8]) -> Result<i64, Vec<u8>> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| resp_error("ERR value is not an integer or out of range"))
}

/// Logs the listening endpoints.
pub fn announce(tcp: Option<std::net::SocketAddr>, unix: Option<&std::path::Path>) {
    if let Some(addr) = tcp {
        info!(%addr, "kvc-devstore listening on tcp");
    }
    if let Some(path) = unix {
        info!(path = %path.display(), "kvc-devstore listening on unix socket");
    }
}
