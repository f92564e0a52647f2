//! Point-in-time copy of a metric store and its on-disk form
//!
//! The snapshot file is a whole-file UTF-8 JSON document:
//!
//! ```json
//! {
//!    "gauge": { "Alloc": 42.5 },
//!    "counter": { "PollCount": 2 }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::error::StorageResult;
use crate::Metric;

/// Both metric namespaces captured together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauge: HashMap<String, f64>,
    #[serde(default)]
    pub counter: HashMap<String, i64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty() && self.counter.is_empty()
    }

    /// Flatten into wire metrics: gauges first, then counters, each sorted
    /// by name.
    pub fn to_metrics(&self) -> Vec<Metric> {
        let mut gauges: Vec<_> = self.gauge.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));

        let mut counters: Vec<_> = self.counter.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        gauges
            .into_iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .chain(
                counters
                    .into_iter()
                    .map(|(name, delta)| Metric::counter(name.clone(), *delta)),
            )
            .collect()
    }
}

/// Write `snapshot` to `path` as indented JSON
///
/// Parent directories are created as needed. The document is written to a
/// sibling temporary file first and renamed over the target, so a crash
/// mid-write leaves the previous snapshot intact.
#[instrument(skip(snapshot), fields(path = %path.display(), metrics = snapshot.len()))]
pub fn backup(snapshot: &Snapshot, path: &Path) -> StorageResult<()> {
    let data = serde_json::to_vec_pretty(snapshot)?;

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    std::fs::write(tmp_path, data)?;
    std::fs::rename(tmp_path, path)?;

    debug!("snapshot written");
    Ok(())
}

/// Read a snapshot document from `path`
pub fn restore(path: &Path) -> StorageResult<Snapshot> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Read a snapshot, falling back to an empty one
///
/// A missing or malformed file is logged and never fatal.
pub fn restore_or_empty(path: &Path) -> Snapshot {
    match restore(path) {
        Ok(snapshot) => {
            debug!(
                "restored {} gauges and {} counters from {}",
                snapshot.gauge.len(),
                snapshot.counter.len(),
                path.display()
            );
            snapshot
        }
        Err(e) => {
            warn!("could not restore snapshot from {}, starting empty: {e}", path.display());
            Snapshot::default()
        }
    }
}
