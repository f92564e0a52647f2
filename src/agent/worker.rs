//! Worker Coordinator: owns every agent loop and shuts them down together
//!
//! Extraction workers each run one sampler loop; samplers are handed out
//! round-robin. Dispatch workers come from the [`Dispatcher`]. Every loop
//! watches one shared [`CancellationToken`] and [`Coordinator::shutdown`]
//! waits for all of them to return.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::collector::{Sampler, run_sampler};
use super::dispatcher::Dispatcher;
use crate::storage::MemoryBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// N: sampler loops; raised to the number of samplers if lower
    pub extraction_workers: usize,
    /// M: concurrent deliveries
    pub dispatch_workers: usize,
    pub poll_interval: Duration,
    pub report_interval: Duration,
}

pub struct Coordinator {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Spawn all extraction and dispatch workers
    pub fn start(
        config: PoolConfig,
        store: Arc<MemoryBackend>,
        samplers: Vec<Arc<dyn Sampler>>,
        dispatcher: Dispatcher,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let extraction_workers = if samplers.is_empty() {
            0
        } else {
            config.extraction_workers.max(samplers.len())
        };

        for id in 0..extraction_workers {
            let sampler = samplers[id % samplers.len()].clone();
            handles.push(tokio::spawn(run_sampler(
                id,
                sampler,
                store.clone(),
                config.poll_interval,
                cancel.clone(),
            )));
        }

        handles.extend(dispatcher.spawn(
            config.dispatch_workers,
            config.report_interval,
            cancel.clone(),
        ));

        info!(
            "agent started: {} extraction workers, {} dispatch workers",
            extraction_workers,
            config.dispatch_workers.max(1)
        );

        Self { cancel, handles }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of running tasks, scheduler included
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every loop and wait for each one to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("agent task ended abnormally: {e}");
            }
        }

        info!("all agent workers stopped");
    }

    /// Run until `signal` resolves, then shut down
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = signal => info!("shutdown signal received"),
            _ = cancel.cancelled() => {}
        }
        self.shutdown().await;
    }
}
