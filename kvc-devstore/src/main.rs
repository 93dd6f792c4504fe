//! Standalone dev store.
//!
//! Configuration comes from `KVC_DEVSTORE_*` variables; logging follows
//! `RUST_LOG` (default `info`).

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvc_devstore::{server, DevStoreConfig, Listeners, Shared};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DevStoreConfig::from_env().context("reading dev store configuration")?;
    let listeners = Listeners::bind(&config).context("binding dev store listeners")?;
    server::announce(listeners.tcp_addr().ok(), listeners.unix_path());

    let shared = Shared::new(config.databases, config.password.clone());
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        let _ = shutdown.send(true);
    });

    listeners
        .serve(Arc::clone(&shared), shutdown_rx)
        .await
        .context("serving dev store")?;

    if let Some(path) = &config.unix_socket {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}
