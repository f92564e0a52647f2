//! SQLite storage backend implementation
//!
//! Gauges and counters are kept in two tables keyed by metric name. Counter
//! accumulation happens inside SQLite via `ON CONFLICT ... DO UPDATE`, so
//! concurrent requests never read-modify-write on the Rust side.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the writer
//! - **Transactional batches**: a batch either lands completely or not at all
//! - **Migrations**: Schema versioning with sqlx

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::snapshot::Snapshot;
use crate::{Metric, MetricValue};

const UPSERT_GAUGE: &str = r#"
    INSERT INTO gauges (name, value) VALUES (?, ?)
    ON CONFLICT (name) DO UPDATE SET value = excluded.value
"#;

const ADD_COUNTER: &str = r#"
    INSERT INTO counters (name, delta) VALUES (?, ?)
    ON CONFLICT (name) DO UPDATE SET delta = counters.delta + excluded.delta
    RETURNING delta
"#;

const SET_COUNTER: &str = r#"
    INSERT INTO counters (name, delta) VALUES (?, ?)
    ON CONFLICT (name) DO UPDATE SET delta = excluded.delta
"#;

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    dsn: String,
}

impl SqliteBackend {
    /// Open (and create if missing) the database named by `dsn`
    ///
    /// `dsn` is either a plain file path (`./metrics.db`) or a `sqlite:` URL
    /// (`sqlite::memory:`, `sqlite://data/metrics.db?mode=rwc`). Migrations
    /// run before the backend is returned.
    #[instrument(skip_all, fields(dsn = %dsn))]
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        info!("initializing SQLite backend");

        let options = if dsn.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(dsn)
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(dsn)
        };

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        // An in-memory database exists per connection, so pin it to one
        let max_connections = if dsn.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            dsn: dsn.to_string(),
        })
    }

    async fn apply(conn: &mut SqliteConnection, metric: &Metric) -> StorageResult<()> {
        match metric.value {
            MetricValue::Gauge(value) => {
                sqlx::query(UPSERT_GAUGE)
                    .bind(&metric.id)
                    .bind(value)
                    .execute(&mut *conn)
                    .await?;
            }
            MetricValue::Counter(delta) => {
                sqlx::query_scalar::<_, i64>(ADD_COUNTER)
                    .bind(&metric.id)
                    .bind(delta)
                    .fetch_one(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<()> {
        sqlx::query(UPSERT_GAUGE)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_counter(&self, name: &str, delta: i64, existed: bool) -> StorageResult<()> {
        if existed {
            self.add_counter(name, delta).await?;
        } else {
            sqlx::query(SET_COUNTER)
                .bind(name)
                .bind(delta)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(ADD_COUNTER)
            .bind(name)
            .bind(delta)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<Option<f64>> {
        let value = sqlx::query_scalar::<_, f64>("SELECT value FROM gauges WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn get_counter(&self, name: &str) -> StorageResult<Option<i64>> {
        let delta = sqlx::query_scalar::<_, i64>("SELECT delta FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delta)
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> StorageResult<Snapshot> {
        // both reads see the same database state
        let mut tx = self.pool.begin().await?;

        let gauge: Vec<(String, f64)> = sqlx::query_as("SELECT name, value FROM gauges")
            .fetch_all(&mut *tx)
            .await?;
        let counter: Vec<(String, i64)> = sqlx::query_as("SELECT name, delta FROM counters")
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Snapshot {
            gauge: gauge.into_iter().collect(),
            counter: counter.into_iter().collect(),
        })
    }

    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn insert_batch(&self, metrics: Vec<Metric>) -> StorageResult<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for metric in &metrics {
            // dropping `tx` on error rolls the whole batch back
            Self::apply(&mut *tx, metric).await?;
        }

        tx.commit().await?;

        debug!("batch of {} metrics committed", metrics.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("dsn".to_string(), self.dsn.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite connection pool");
        self.pool.close().await;
        Ok(())
    }
}
