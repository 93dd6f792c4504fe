//! # KVC Dev Store
//!
//! Purpose: A small in-memory RESP2 store implementing the verbs the cache
//! client relies on, for local development and integration tests.
//!
//! ## Usage
//!
//! - Run the `kvc-devstore` binary for a standalone store.
//! - Call `DevStore::spawn` to run one on a background thread inside a test.

pub mod keyspace;
pub mod protocol;
pub mod scripted;
pub mod server;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::watch;
use tracing::error;

pub use keyspace::{Keyspace, TtlStatus, DEFAULT_DATABASES};
pub use server::{CommandHook, Shared};

/// Errors raised while starting a dev store.
#[derive(Debug, Error)]
pub enum DevStoreError {
    #[error("failed to bind {what}: {source}")]
    Bind {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Dev store settings.
#[derive(Debug, Clone)]
pub struct DevStoreConfig {
    /// TCP listen address; port 0 picks a free port.
    pub addr: String,
    /// Optional unix socket path to listen on as well.
    pub unix_socket: Option<PathBuf>,
    /// Password clients must AUTH with.
    pub password: Option<String>,
    /// Number of numbered databases.
    pub databases: usize,
}

impl Default for DevStoreConfig {
    fn default() -> Self {
        DevStoreConfig {
            addr: "127.0.0.1:0".to_string(),
            unix_socket: None,
            password: None,
            databases: DEFAULT_DATABASES,
        }
    }
}

impl DevStoreConfig {
    /// Reads `KVC_DEVSTORE_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, DevStoreError> {
        let mut config = DevStoreConfig {
            addr: "127.0.0.1:6379".to_string(),
            ..Default::default()
        };
        if let Ok(addr) = std::env::var("KVC_DEVSTORE_ADDR") {
            config.addr = addr;
        }
        if let Ok(path) = std::env::var("KVC_DEVSTORE_SOCKET") {
            if !path.is_empty() {
                config.unix_socket = Some(PathBuf::from(path));
            }
        }
        if let Ok(password) = std::env::var("KVC_DEVSTORE_PASSWORD") {
            if !password.is_empty() {
                config.password = Some(password);
            }
        }
        if let Ok(raw) = std::env::var("KVC_DEVSTORE_DATABASES") {
            config.databases = raw
                .parse()
                .map_err(|_| DevStoreError::Config(format!("KVC_DEVSTORE_DATABASES={}", raw)))?;
        }
        Ok(config)
    }
}

/// Listeners bound ahead of starting the runtime, so bind errors are
/// reported synchronously.
pub struct Listeners {
    tcp: std::net::TcpListener,
    #[cfg(unix)]
    unix: Option<(std::os::unix::net::UnixListener, PathBuf)>,
}

impl Listeners {
    pub fn bind(config: &DevStoreConfig) -> Result<Self, DevStoreError> {
        let bind_err =
            |what: String| move |source: std::io::Error| DevStoreError::Bind { what, source };

        let tcp = std::net::TcpListener::bind(&config.addr).map_err(bind_err(config.addr.clone()))?;
        tcp.set_nonblocking(true).map_err(bind_err(config.addr.clone()))?;

        #[cfg(unix)]
        let unix = match &config.unix_socket {
            Some(path) => {
                let what = path.display().to_string();
                // A stale socket file from a previous run blocks bind.
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = std::os::unix::net::UnixListener::bind(path)
                    .map_err(bind_err(what.clone()))?;
                listener.set_nonblocking(true).map_err(bind_err(what))?;
                Some((listener, path.clone()))
            }
            None => None,
        };
        #[cfg(not(unix))]
        if config.unix_socket.is_some() {
            return Err(DevStoreError::Config(
                "unix sockets are not available on this platform".to_string(),
            ));
        }

        Ok(Listeners {
            tcp,
            #[cfg(unix)]
            unix,
        })
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn unix_path(&self) -> Option<&Path> {
        #[cfg(unix)]
        {
            self.unix.as_ref().map(|(_, path)| path.as_path())
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Serves every listener plus the expiry sweeper until `shutdown` flips.
    ///
    /// Must run inside a tokio runtime.
    pub async fn serve(
        self,
        shared: Arc<Shared>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let tcp = tokio::net::TcpListener::from_std(self.tcp)?;
        let sweeper = tokio::spawn(server::sweep_expired(
            Arc::clone(&shared),
            wait_for(shutdown.clone()),
        ));

        #[cfg(unix)]
        let unix_task = match self.unix {
            Some((listener, _)) => {
                let listener = tokio::net::UnixListener::from_std(listener)?;
                Some(tokio::spawn(server::serve_unix(
                    listener,
                    Arc::clone(&shared),
                    wait_for(shutdown.clone()),
                )))
            }
            None => None,
        };

        let result = server::serve_tcp(tcp, shared, wait_for(shutdown)).await;

        #[cfg(unix)]
        if let Some(task) = unix_task {
            let _ = task.await;
        }
        let _ = sweeper.await;
        result
    }
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// A dev store running on a background thread.
///
/// Dropping the handle stops the server and removes its unix socket file.
pub struct DevStore {
    addr: SocketAddr,
    unix_socket: Option<PathBuf>,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl DevStore {
    /// Binds the listeners and starts serving on a dedicated thread.
    pub fn spawn(config: DevStoreConfig) -> Result<Self, DevStoreError> {
        let listeners = Listeners::bind(&config)?;
        let addr = listeners
            .tcp_addr()
            .map_err(|source| DevStoreError::Bind {
                what: config.addr.clone(),
                source,
            })?;
        let unix_socket = listeners.unix_path().map(Path::to_path_buf);

        let shared = Shared::new(config.databases, config.password.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DevStoreError::Runtime)?;

        let server_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("kvc-devstore".to_string())
            .spawn(move || {
                if let Err(err) = runtime.block_on(listeners.serve(server_shared, shutdown_rx)) {
                    error!(error = %err, "dev store stopped with error");
                }
            })
            .map_err(DevStoreError::Runtime)?;

        Ok(DevStore {
            addr,
            unix_socket,
            shared,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Starts a dev store on a free localhost port with default settings.
    pub fn start() -> Result<Self, DevStoreError> {
        DevStore::spawn(DevStoreConfig::default())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn unix_socket(&self) -> Option<&Path> {
        self.unix_socket.as_deref()
    }

    /// Direct access to the stored data, for assertions.
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        self.shared.with_keyspace(f)
    }

    /// Runs `hook` before every data command, for fault injection.
    pub fn set_command_hook<F>(&self, hook: F)
    where
        F: Fn(&mut Keyspace, usize, &[Vec<u8>]) + Send + Sync + 'static,
    {
        self.shared.set_command_hook(hook);
    }

    pub fn clear_command_hook(&self) {
        self.shared.clear_command_hook();
    }
}

impl Drop for DevStore {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(path) = &self.unix_socket {
            let _ = std::fs::remove_file(path);
        }
    }
}
