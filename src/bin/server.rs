use std::sync::Arc;

use anyhow::Context;
use metrics_relay::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::ServerConfig,
    envelope::PrivateKey,
    storage::{FileBackend, StorageBackend},
    util::{init_tracing, shutdown_signal},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = ServerConfig::load()?;
    init_tracing(&config.log_level, "relay_server");
    trace!("started with config: {config:?}");

    let private_key = match &config.crypto_key {
        Some(path) => {
            let key = PrivateKey::load(path)
                .with_context(|| format!("failed to load private key {}", path.display()))?;
            key.self_check().context("private key failed self-check")?;
            info!("decrypting payloads with {}", path.display());
            Some(key)
        }
        None => None,
    };

    let cancel = CancellationToken::new();
    let (storage, backup_task) = open_storage(&config, cancel.clone()).await?;

    let state = ApiState::new(storage.clone())
        .with_key(config.key.clone())
        .with_private_key(private_key)
        .with_trusted_subnet(config.trusted_subnet);

    let (addr, server) = spawn_api_server(
        ApiConfig {
            bind_addr: config.address.clone(),
        },
        state,
        cancel.clone(),
    )
    .await
    .with_context(|| format!("failed to start server on {}", config.address))?;

    info!("collector ready on {addr}");
    shutdown_signal().await;
    cancel.cancel();

    if let Err(e) = server.await {
        error!("server task ended abnormally: {e}");
    }
    if let Some(task) = backup_task
        && let Err(e) = task.await
    {
        error!("backup task ended abnormally: {e}");
    }

    storage.close().await?;
    info!("collector stopped");
    Ok(())
}

/// SQLite when a DSN is configured, otherwise the snapshot file
async fn open_storage(
    config: &ServerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<(Arc<dyn StorageBackend>, Option<JoinHandle<()>>)> {
    if let Some(dsn) = &config.database_dsn {
        return open_database(dsn).await.map(|storage| (storage, None));
    }

    let sync_writes = config.store_interval.is_zero();
    let backend = Arc::new(FileBackend::open(&config.store_file, config.restore, sync_writes));

    let backup_task = if sync_writes {
        None
    } else {
        Some(backend.clone().spawn_backup_task(config.store_interval, cancel))
    };

    Ok((backend, backup_task))
}

#[cfg(feature = "storage-sqlite")]
async fn open_database(dsn: &str) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend = metrics_relay::storage::SqliteBackend::connect(dsn)
        .await
        .context("failed to open database")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "storage-sqlite"))]
async fn open_database(_dsn: &str) -> anyhow::Result<Arc<dyn StorageBackend>> {
    anyhow::bail!("built without the storage-sqlite feature")
}
