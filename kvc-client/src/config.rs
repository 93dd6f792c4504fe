//! # Connection Configuration
//!
//! Purpose: Describe how to reach the store and how to prepare a fresh
//! session (auth, database, key prefix) before any command runs.
//!
//! ## Notes
//! - A unix socket path, when present, wins over host/port.
//! - The config is resolved once and never mutated by the connection.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Default connect timeout, matching a short interactive budget.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on waiting for a reply.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on a blocked socket write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Parameters for a [`StoreConnection`](crate::StoreConnection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Hostname or IP address. Ignored when `unix_socket` is set.
    pub host: String,
    /// TCP port. Ignored when `unix_socket` is set.
    pub port: u16,
    /// Unix socket path, e.g. `/var/run/redis/redis.sock`.
    pub unix_socket: Option<PathBuf>,
    /// Password sent with AUTH right after connecting.
    pub password: Option<String>,
    /// Database index selected after connecting; 0 skips SELECT.
    pub database: u32,
    /// Reuse sockets across connection instances in this process.
    pub persistent: bool,
    /// Namespace prepended to every key argument.
    pub key_prefix: String,
    /// Upper bound for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Socket read timeout; `None` waits for replies indefinitely.
    pub read_timeout: Option<Duration>,
    /// Socket write timeout; `None` blocks writes indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 6379,
            unix_socket: None,
            password: None,
            database: 0,
            persistent: false,
            key_prefix: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

impl ConnectionConfig {
    /// Config for a TCP endpoint with defaults for everything else.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Config for a unix socket endpoint.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ConnectionConfig {
            unix_socket: Some(path.into()),
            ..Default::default()
        }
    }

    /// Reads the config from `KVC_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are configuration
    /// errors rather than silently ignored.
    pub fn from_env() -> StoreResult<Self> {
        let mut config = ConnectionConfig::default();
        if let Ok(host) = std::env::var("KVC_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env::<u16>("KVC_PORT")? {
            config.port = port;
        }
        if let Ok(path) = std::env::var("KVC_UNIX_SOCKET") {
            if !path.is_empty() {
                config.unix_socket = Some(PathBuf::from(path));
            }
        }
        if let Ok(password) = std::env::var("KVC_PASSWORD") {
            if !password.is_empty() {
                config.password = Some(password);
            }
        }
        if let Some(database) = parse_env::<u32>("KVC_DATABASE")? {
            config.database = database;
        }
        if let Some(persistent) = parse_env::<bool>("KVC_PERSISTENT")? {
            config.persistent = persistent;
        }
        if let Ok(prefix) = std::env::var("KVC_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(ms) = parse_env::<u64>("KVC_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("KVC_READ_TIMEOUT_MS")? {
            config.read_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_env::<u64>("KVC_WRITE_TIMEOUT_MS")? {
            config.write_timeout = Some(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a connection relies on.
    pub fn validate(&self) -> StoreResult<()> {
        match &self.unix_socket {
            Some(path) => {
                if cfg!(not(unix)) {
                    return Err(StoreError::Configuration(
                        "unix sockets are not available on this platform".to_string(),
                    ));
                }
                if path.as_os_str().is_empty() {
                    return Err(StoreError::Configuration("unix socket path is empty".to_string()));
                }
            }
            None => {
                if self.host.trim().is_empty() {
                    return Err(StoreError::Configuration("host is empty".to_string()));
                }
                if self.port == 0 {
                    return Err(StoreError::Configuration("port must be non-zero".to_string()));
                }
            }
        }
        if self.connect_timeout.is_zero() {
            return Err(StoreError::Configuration(
                "connect timeout must be non-zero".to_string(),
            ));
        }
        // Sockets reject a zero timeout; `None` is the way to disable one.
        if self.read_timeout.is_some_and(|timeout| timeout.is_zero())
            || self.write_timeout.is_some_and(|timeout| timeout.is_zero())
        {
            return Err(StoreError::Configuration(
                "read and write timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved endpoint, honoring the unix socket override.
    pub fn endpoint(&self) -> Endpoint {
        match &self.unix_socket {
            Some(path) => Endpoint::Unix(path.clone()),
            None => Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
        }
    }
}

/// Where the store listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> StoreResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| StoreError::Configuration(format!("{} has an invalid value: {}", name, raw))),
        _ => Ok(None),
    }
}
