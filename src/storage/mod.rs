//! Metric stores
//!
//! Every store implements [`StorageBackend`]: two independent namespaces,
//! gauges (last value wins) and counters (deltas are summed).
//!
//! ## Backends
//!
//! - **Memory**: two-lock in-memory maps; used by the agent and as the core
//!   of the file backend
//! - **File**: in-memory maps persisted as a JSON [`Snapshot`] document
//! - **SQLite** (feature `storage-sqlite`): two tables, transactional batches
//!
//! ## Usage
//!
//! ```no_run
//! use metrics_relay::storage::{FileBackend, StorageBackend};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = FileBackend::open("tmp/metrics-db.json", true, false);
//! backend.add_counter("PollCount", 1).await?;
//! backend.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod snapshot;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use snapshot::Snapshot;
#[cfg(feature = "storage-sqlite")]
pub use sqlite::SqliteBackend;
