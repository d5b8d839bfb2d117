//! # parley-node
//!
//! Parley node binary: loads settings, opens the store, connects shared
//! state and the bus (Redis, or in-process for a single node), and serves
//! until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::ProcessId;
use parley_server::bus::{BusTransport, MemoryBusHub, RedisTransport};
use parley_server::shared::{MemorySharedState, RedisSharedState, SharedState};
use parley_server::{ParleyServer, ServerConfig};
use parley_settings::{ParleySettings, expand_home, load_settings, load_settings_from_path};
use parley_store::{ConnectionConfig, SqliteChatStore};

/// Parley chat node.
#[derive(Parser, Debug)]
#[command(name = "parley-node", about = "Parley distributed chat node")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Redis URL for shared state and the bus. Without one the node runs alone.
    #[arg(long)]
    redis_url: Option<String>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<String>,

    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Load settings from the chosen file and apply flag overrides.
    fn load_settings(&self) -> Result<ParleySettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.redis_url {
            settings.redis.url = Some(url.clone());
        }
        if let Some(path) = &self.db_path {
            settings.store.path.clone_from(path);
        }
    }
}

fn open_store(settings: &ParleySettings) -> Result<SqliteChatStore> {
    let path = expand_home(&settings.store.path);
    let path = path
        .to_str()
        .with_context(|| format!("Database path is not UTF-8: {}", path.display()))?;
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        ..ConnectionConfig::default()
    };
    SqliteChatStore::open_file(path, &config)
        .with_context(|| format!("Failed to open database: {path}"))
}

async fn connect_backends(
    settings: &ParleySettings,
) -> Result<(Arc<dyn SharedState>, Arc<dyn BusTransport>)> {
    match settings.redis.url.as_deref() {
        Some(url) => {
            let shared = RedisSharedState::connect(url)
                .await
                .context("Failed to connect shared state to Redis")?;
            let transport = RedisTransport::connect(url)
                .await
                .context("Failed to connect bus to Redis")?;
            Ok((Arc::new(shared), Arc::new(transport)))
        }
        None => {
            tracing::warn!("no Redis URL configured, running as a single node");
            Ok((
                Arc::new(MemorySharedState::new()),
                Arc::new(MemoryBusHub::default().transport()),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    parley_logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let _ = parley_settings::init_settings(settings.clone());

    let store = open_store(&settings)?;
    let (shared, transport) = connect_backends(&settings).await?;
    let metrics = parley_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let process_id = ProcessId::resolve(settings.node.process_id.as_deref());

    let server = ParleyServer::new(
        ServerConfig::from_settings(&settings),
        process_id,
        Arc::new(store),
        shared,
        transport,
        metrics,
    );
    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        addr = %handle.addr,
        process_id = %server.process_id(),
        "Parley node listening on ws://{}/ws",
        handle.addr
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    server.teardown().await;
    server
        .shutdown()
        .graceful_shutdown(handle.into_tasks(), None)
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_override_nothing() {
        let cli = Cli::parse_from(["parley-node"]);
        let mut settings = ParleySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, ParleySettings::default().server.port);
        assert!(settings.redis.url.is_none());
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "parley-node",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
            "--redis-url",
            "redis://cache:6379",
            "--db-path",
            "/tmp/parley-test.db",
        ]);
        let mut settings = ParleySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.store.path, "/tmp/parley-test.db");
    }

    #[test]
    fn settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9000,"host":"10.0.0.1"}}"#).unwrap();

        let cli = Cli::parse_from([
            "parley-node",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "9001",
        ]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.port, 9001);
    }

    #[test]
    fn store_opens_under_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ParleySettings::default();
        settings.store.path = dir
            .path()
            .join("nested")
            .join("parley.db")
            .to_string_lossy()
            .into_owned();
        let _store = open_store(&settings).unwrap();
        assert!(dir.path().join("nested").join("parley.db").exists());
    }

    #[tokio::test]
    async fn without_redis_backends_are_in_process() {
        let settings = ParleySettings::default();
        let (shared, _transport) = connect_backends(&settings).await.unwrap();
        assert_eq!(shared.incr("k").await.unwrap(), 1);
    }
}
