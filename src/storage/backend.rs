//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait that every metric store
//! (memory, file-snapshotted memory, SQLite) implements. The ingestion API
//! only ever talks to a `dyn StorageBackend`.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::snapshot::Snapshot;
use crate::Metric;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for metric stores
///
/// Gauges and counters live in two independent namespaces: a gauge update
/// replaces the stored value, a counter update adds to it.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between
/// request handlers and background tasks.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. In-memory mutations cannot fail;
/// persistent backends surface their I/O or query errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Replace the value of a gauge
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<()>;

    /// Add `delta` to a counter when `existed` is set, otherwise initialize it
    /// to `delta`
    ///
    /// The caller is expected to have checked existence beforehand. Prefer
    /// [`StorageBackend::add_counter`], which folds check and update into one
    /// step.
    async fn update_counter(&self, name: &str, delta: i64, existed: bool) -> StorageResult<()>;

    /// Add `delta` to a counter, creating it when absent, and return the new
    /// total
    async fn add_counter(&self, name: &str, delta: i64) -> StorageResult<i64>;

    /// Current value of a gauge, if present
    async fn get_gauge(&self, name: &str) -> StorageResult<Option<f64>>;

    /// Current value of a counter, if present
    async fn get_counter(&self, name: &str) -> StorageResult<Option<i64>>;

    /// Copy of both namespaces, consistent at the time of the call
    async fn get_all(&self) -> StorageResult<Snapshot>;

    /// Apply a list of updates
    ///
    /// Each individual update is atomic. Transactional backends apply the
    /// whole batch atomically and roll back on any failure; pure in-memory
    /// backends return [`StorageError::NotSupported`](super::StorageError).
    async fn insert_batch(&self, metrics: Vec<Metric>) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    ///
    /// File-backed stores write a final snapshot here.
    async fn close(&self) -> StorageResult<()>;
}
