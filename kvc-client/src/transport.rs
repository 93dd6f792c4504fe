//! # Socket Transport
//!
//! Purpose: Own the raw byte stream to the store (TCP or unix socket) and the
//! process-wide registry that keeps persistent sockets alive between
//! connection instances.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Persistent sockets go back to a bounded idle set.
//! 2. **Minimal Locking**: The registry mutex is held only to move sockets.
//! 3. **Cache-Friendly Buffers**: Each socket reuses its own buffers.

use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::command::Command;
use crate::config::{ConnectionConfig, Endpoint};
use crate::resp::{encode_command, read_reply, RespError, Reply};

/// Idle persistent sockets kept per endpoint.
const MAX_IDLE_PER_ENDPOINT: usize = 8;

enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.flush(),
        }
    }
}

impl Transport {
    fn shutdown(&self) {
        let _ = match self {
            Transport::Tcp(stream) => stream.shutdown(std::net::Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.shutdown(std::net::Shutdown::Both),
        };
    }
}

/// Single store socket with reusable buffers.
pub(crate) struct Socket {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Transport>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Socket {
    /// Opens a fresh socket to the configured endpoint.
    pub(crate) fn connect(config: &ConnectionConfig) -> io::Result<Self> {
        let transport = match config.endpoint() {
            Endpoint::Tcp { host, port } => {
                let stream = connect_tcp(&host, port, config)?;
                stream.set_read_timeout(config.read_timeout)?;
                stream.set_write_timeout(config.write_timeout)?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                Transport::Tcp(stream)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(&path)?;
                stream.set_read_timeout(config.read_timeout)?;
                stream.set_write_timeout(config.write_timeout)?;
                Transport::Unix(stream)
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                ))
            }
        };

        Ok(Socket {
            reader: BufReader::new(transport),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    /// Writes every command in one buffer, so a group costs one round trip.
    pub(crate) fn send<'a, I>(&mut self, commands: I, key_prefix: &[u8]) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        self.write_buf.clear();
        for command in commands {
            encode_command(command, key_prefix, &mut self.write_buf);
        }

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()
    }

    /// Reads the next reply off the socket.
    pub(crate) fn receive(&mut self) -> Result<Reply, RespError> {
        read_reply(&mut self.reader, &mut self.line_buf)
    }

    pub(crate) fn shutdown(self) {
        self.reader.get_ref().shutdown();
    }
}

fn connect_tcp(host: &str, port: u16, config: &ConnectionConfig) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", host))
    }))
}

/// Identity of a reusable persistent socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PersistentKey {
    endpoint: Endpoint,
    database: u32,
    password: Option<String>,
}

impl PersistentKey {
    pub(crate) fn for_config(config: &ConnectionConfig) -> Self {
        PersistentKey {
            endpoint: config.endpoint(),
            database: config.database,
            password: config.password.clone(),
        }
    }
}

fn registry() -> &'static Mutex<HashMap<PersistentKey, Vec<Socket>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PersistentKey, Vec<Socket>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Takes an idle persistent socket, if one is parked for this key.
pub(crate) fn checkout(key: &PersistentKey) -> Option<Socket> {
    let mut idle = registry().lock();
    idle.get_mut(key).and_then(Vec::pop)
}

/// Parks a healthy persistent socket; surplus sockets are shut down.
pub(crate) fn checkin(key: PersistentKey, socket: Socket) {
    let surplus = {
        let mut idle = registry().lock();
        let parked = idle.entry(key).or_default();
        if parked.len() < MAX_IDLE_PER_ENDPOINT {
            parked.push(socket);
            None
        } else {
            Some(socket)
        }
    };
    if let Some(socket) = surplus {
        socket.shutdown();
    }
}

/// Number of idle persistent sockets parked for `config`.
pub fn idle_persistent(config: &ConnectionConfig) -> usize {
    let idle = registry().lock();
    idle.get(&PersistentKey::for_config(config))
        .map(Vec::len)
        .unwrap_or(0)
}
