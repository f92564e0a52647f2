//! In-memory store backed by a JSON snapshot file
//!
//! All reads and writes are served by a [`MemoryBackend`]. The snapshot file
//! is refreshed periodically by [`FileBackend::spawn_backup_task`], after
//! every mutation when `sync_writes` is set, and once more on
//! [`StorageBackend::close`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::memory::MemoryBackend;
use super::snapshot::{self, Snapshot};
use crate::Metric;

pub struct FileBackend {
    inner: MemoryBackend,
    path: PathBuf,
    sync_writes: bool,
    // one writer at a time; they share the temp file
    write_lock: tokio::sync::Mutex<()>,
}

impl FileBackend {
    /// Open a file-backed store at `path`
    ///
    /// With `restore` set, an existing snapshot is loaded first; a missing or
    /// unreadable file leaves the store empty. `sync_writes` persists the
    /// snapshot after every mutation.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, restore: bool, sync_writes: bool) -> Self {
        let path = path.as_ref().to_path_buf();

        let inner = if restore {
            MemoryBackend::from_snapshot(snapshot::restore_or_empty(&path))
        } else {
            MemoryBackend::new()
        };

        info!(
            "file storage ready with {} metrics (sync writes: {})",
            inner.len(),
            sync_writes
        );

        Self {
            inner,
            path,
            sync_writes,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current contents to the snapshot file
    pub async fn backup(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.snapshot();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || snapshot::backup(&snapshot, &path))
            .await
            .map_err(|e| StorageError::IoError(std::io::Error::other(e)))?
    }

    async fn persist_if_sync(&self) -> StorageResult<()> {
        if self.sync_writes {
            self.backup().await?;
        }
        Ok(())
    }

    /// Snapshot to disk every `interval` until `cancel` fires
    ///
    /// Failed writes are logged and retried on the next tick. The final
    /// snapshot on shutdown is left to [`StorageBackend::close`].
    pub fn spawn_backup_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("backup task stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.backup().await {
                            error!("periodic snapshot to {} failed: {e}", self.path.display());
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<()> {
        self.inner.update_gauge(name, value);
        self.persist_if_sync().await
    }

    async fn update_counter(&self, name: &str, delta: i64, existed: bool) -> StorageResult<()> {
        self.inner.update_counter(name, delta, existed);
        self.persist_if_sync().await
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        let total = self.inner.add_counter(name, delta);
        self.persist_if_sync().await?;
        Ok(total)
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<Option<f64>> {
        Ok(self.inner.gauge(name))
    }

    async fn get_counter(&self, name: &str) -> StorageResult<Option<i64>> {
        Ok(self.inner.counter(name))
    }

    async fn get_all(&self) -> StorageResult<Snapshot> {
        Ok(self.inner.snapshot())
    }

    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn insert_batch(&self, metrics: Vec<Metric>) -> StorageResult<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        for metric in &metrics {
            self.inner.apply(metric);
        }

        debug!("applied batch of {} metrics", metrics.len());
        self.persist_if_sync().await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut status = StorageBackend::health_check(&self.inner).await?;
        status.message = "File-backed storage operational".to_string();
        status.metadata.insert("backend".to_string(), "file".to_string());
        status
            .metadata
            .insert("path".to_string(), self.path.display().to_string());
        Ok(status)
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn close(&self) -> StorageResult<()> {
        self.backup().await?;
        info!("final snapshot written");
        Ok(())
    }
}
