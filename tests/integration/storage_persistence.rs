//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - The snapshot file survives a collector restart
//! - Restore can be switched off
//! - SQLite keeps metrics across reconnects and applies batches atomically

use std::sync::Arc;
use std::time::Duration;

use metrics_relay::{
    Metric,
    storage::{FileBackend, StorageBackend},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_file_backend_restores_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("metrics.json");

    {
        let backend = FileBackend::open(&path, true, false);
        backend.update_gauge("Alloc", 12.5).await.unwrap();
        backend.add_counter("PollCount", 4).await.unwrap();
        backend.close().await.unwrap();
    }

    let restored = FileBackend::open(&path, true, false);
    assert_eq!(restored.get_gauge("Alloc").await.unwrap(), Some(12.5));
    assert_eq!(restored.add_counter("PollCount", 1).await.unwrap(), 5);

    let fresh = FileBackend::open(&path, false, false);
    assert!(fresh.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_writes_persist_every_update() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let backend = FileBackend::open(&path, false, true);
    backend.update_gauge("Alloc", 1.0).await.unwrap();

    // no close: the write already happened
    let restored = FileBackend::open(&path, true, false);
    assert_eq!(restored.get_gauge("Alloc").await.unwrap(), Some(1.0));
}

#[tokio::test]
async fn test_periodic_backup_task_writes_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let backend = Arc::new(FileBackend::open(&path, false, false));
    backend.add_counter("PollCount", 2).await.unwrap();

    let cancel = CancellationToken::new();
    let task = backend.clone().spawn_backup_task(Duration::from_millis(20), cancel.clone());

    for _ in 0..50 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    task.await.unwrap();

    let restored = FileBackend::open(&path, true, false);
    assert_eq!(restored.get_counter("PollCount").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    std::fs::write(&path, "{not json").unwrap();

    let backend = FileBackend::open(&path, true, false);
    assert!(backend.get_all().await.unwrap().is_empty());
}

#[cfg(feature = "storage-sqlite")]
mod sqlite {
    use super::*;
    use pretty_assertions::assert_eq;
    use metrics_relay::storage::SqliteBackend;

    #[tokio::test]
    async fn test_sqlite_persists_across_reconnect() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("metrics.db");
        let dsn = db_path.to_str().unwrap();

        {
            let backend = SqliteBackend::connect(dsn).await.unwrap();
            backend
                .insert_batch(vec![
                    Metric::gauge("Alloc", 3.0),
                    Metric::counter("PollCount", 2),
                    Metric::counter("PollCount", 5),
                ])
                .await
                .unwrap();
            backend.close().await.unwrap();
        }

        let backend = SqliteBackend::connect(dsn).await.unwrap();
        assert_eq!(backend.get_gauge("Alloc").await.unwrap(), Some(3.0));
        assert_eq!(backend.get_counter("PollCount").await.unwrap(), Some(7));

        let snapshot = backend.get_all().await.unwrap();
        assert_eq!(
            snapshot.to_metrics(),
            vec![Metric::gauge("Alloc", 3.0), Metric::counter("PollCount", 7)]
        );
    }

    #[tokio::test]
    async fn test_sqlite_url_dsn_in_memory() {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        assert_eq!(backend.add_counter("Hits", 2).await.unwrap(), 2);
        assert_eq!(backend.add_counter("Hits", 2).await.unwrap(), 4);

        let health = backend.health_check().await.unwrap();
        assert!(health.healthy);
    }
}
