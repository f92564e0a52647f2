//! In-memory metric store (no persistence)
//!
//! Gauges and counters live in two maps, each behind its own lock, so gauge
//! traffic never blocks counter traffic. Readers that need both maps take
//! the gauge lock first and the counter lock second.
//!
//! This is the store the agent's samplers write into, and the core that
//! [`FileBackend`](super::file::FileBackend) wraps on the server.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::snapshot::Snapshot;
use crate::{Metric, MetricValue};

/// Two-map metric store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    gauges: Mutex<HashMap<String, f64>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated from a snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            gauges: Mutex::new(snapshot.gauge),
            counters: Mutex::new(snapshot.counter),
        }
    }

    pub fn update_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().insert(name.to_string(), value);
    }

    /// Add to the counter when `existed`, otherwise initialize it to `delta`
    pub fn update_counter(&self, name: &str, delta: i64, existed: bool) {
        let mut counters = self.counters.lock();
        if existed {
            let current = counters.entry(name.to_string()).or_default();
            *current = current.wrapping_add(delta);
        } else {
            counters.insert(name.to_string(), delta);
        }
    }

    /// Upsert-add under a single lock acquisition; returns the new total
    pub fn add_counter(&self, name: &str, delta: i64) -> i64 {
        let mut counters = self.counters.lock();
        let current = counters.entry(name.to_string()).or_default();
        *current = current.wrapping_add(delta);
        *current
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.lock().get(name).copied()
    }

    /// Copy both maps while holding both locks
    pub fn snapshot(&self) -> Snapshot {
        let gauges = self.gauges.lock();
        let counters = self.counters.lock();

        Snapshot {
            gauge: gauges.clone(),
            counter: counters.clone(),
        }
    }

    /// Replace the whole contents with `snapshot`
    pub fn replace(&self, snapshot: Snapshot) {
        let mut gauges = self.gauges.lock();
        let mut counters = self.counters.lock();

        *gauges = snapshot.gauge;
        *counters = snapshot.counter;
    }

    /// Apply one wire metric with its kind's semantics and return the stored
    /// result
    pub fn apply(&self, metric: &Metric) -> Metric {
        match metric.value {
            MetricValue::Gauge(value) => {
                self.update_gauge(&metric.id, value);
                Metric::gauge(metric.id.clone(), value)
            }
            MetricValue::Counter(delta) => {
                let total = self.add_counter(&metric.id, delta);
                Metric::counter(metric.id.clone(), total)
            }
        }
    }

    pub fn len(&self) -> usize {
        let gauges = self.gauges.lock();
        let counters = self.counters.lock();
        gauges.len() + counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<()> {
        MemoryBackend::update_gauge(self, name, value);
        Ok(())
    }

    async fn update_counter(&self, name: &str, delta: i64, existed: bool) -> StorageResult<()> {
        MemoryBackend::update_counter(self, name, delta, existed);
        Ok(())
    }

    async fn add_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        Ok(MemoryBackend::add_counter(self, name, delta))
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<Option<f64>> {
        Ok(self.gauge(name))
    }

    async fn get_counter(&self, name: &str) -> StorageResult<Option<i64>> {
        Ok(self.counter(name))
    }

    async fn get_all(&self) -> StorageResult<Snapshot> {
        Ok(self.snapshot())
    }

    async fn insert_batch(&self, metrics: Vec<Metric>) -> StorageResult<()> {
        trace!("rejecting batch of {} metrics", metrics.len());
        Err(StorageError::NotSupported("insert_batch".to_string()))
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_metrics".to_string(), self.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        trace!("closing in-memory backend (no-op)");
        Ok(())
    }
}
