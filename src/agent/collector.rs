//! Samplers that populate the agent's metric store
//!
//! Each sampler reads one source of metrics and writes them into a shared
//! [`MemoryBackend`] with the standard update contract. Sampler loops are
//! driven by the [`Coordinator`](super::worker::Coordinator).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::alloc;
use crate::storage::MemoryBackend;

/// Gauges written by [`RuntimeSampler`]
pub const RUNTIME_GAUGES: &[&str] = &[
    "Alloc",
    "TotalAlloc",
    "Mallocs",
    "Frees",
    "HeapObjects",
    "Sys",
    "RSS",
    "ProcessCPU",
    "ProcessRunTime",
    "DiskReadTotal",
    "DiskWrittenTotal",
    "RandomValue",
];

/// Counter incremented once per runtime sample
pub const POLL_COUNT: &str = "PollCount";

/// Gauges written by [`HostSampler`]
pub const HOST_GAUGES: &[&str] = &["TotalMemory", "FreeMemory", "CPUutilization1"];

/// One source of metrics
#[async_trait]
pub trait Sampler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Take one sample and write it into `store`
    ///
    /// On error nothing from this cycle may be assumed written.
    async fn sample(&self, store: &MemoryBackend) -> Result<()>;
}

/// Process-level allocation, memory, CPU and I/O figures
pub struct RuntimeSampler {
    system: Mutex<System>,
    pid: Pid,
}

impl RuntimeSampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("cannot determine own pid: {e}"))?;

        Ok(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

#[async_trait]
impl Sampler for RuntimeSampler {
    fn name(&self) -> &'static str {
        "runtime"
    }

    async fn sample(&self, store: &MemoryBackend) -> Result<()> {
        let mut system = self.system.lock().await;
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = system
            .process(self.pid)
            .with_context(|| format!("process {} not visible", self.pid))?;

        let allocations = alloc::current();
        let disk = process.disk_usage();
        let random: f64 = rand::thread_rng().gen_range(0.0..1.0);

        let gauges = [
            ("Alloc", allocations.live_bytes as f64),
            ("TotalAlloc", allocations.total_bytes as f64),
            ("Mallocs", allocations.mallocs as f64),
            ("Frees", allocations.frees as f64),
            ("HeapObjects", allocations.heap_objects() as f64),
            ("Sys", process.virtual_memory() as f64),
            ("RSS", process.memory() as f64),
            ("ProcessCPU", f64::from(process.cpu_usage())),
            ("ProcessRunTime", process.run_time() as f64),
            ("DiskReadTotal", disk.total_read_bytes as f64),
            ("DiskWrittenTotal", disk.total_written_bytes as f64),
            ("RandomValue", random),
        ];

        for (name, value) in gauges {
            store.update_gauge(name, value);
        }
        let polls = store.add_counter(POLL_COUNT, 1);

        trace!("runtime sample #{polls} stored");
        Ok(())
    }
}

/// Host memory and CPU utilization
pub struct HostSampler {
    system: Mutex<System>,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sampler for HostSampler {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn sample(&self, store: &MemoryBackend) -> Result<()> {
        let mut system = self.system.lock().await;

        // CPU usage is the delta between two refreshes
        system.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = system
            .cpus()
            .first()
            .map(|cpu| f64::from(cpu.cpu_usage()))
            .context("no CPU reported by the host")?;

        store.update_gauge("TotalMemory", system.total_memory() as f64);
        store.update_gauge("FreeMemory", system.free_memory() as f64);
        store.update_gauge("CPUutilization1", cpu);

        trace!("host sample stored");
        Ok(())
    }
}

/// Run `sampler` every `interval` until `cancel` fires
///
/// Cancellation is checked before each cycle; a sample already running
/// completes first. Failed samples are logged and the loop continues.
#[instrument(skip_all, fields(sampler = sampler.name(), worker = worker_id))]
pub async fn run_sampler(
    worker_id: usize,
    sampler: Arc<dyn Sampler>,
    store: Arc<MemoryBackend>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!("extraction worker started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = sampler.sample(&store).await {
            warn!("sample skipped: {e:#}");
        }
    }

    debug!("extraction worker stopped");
}
