use std::alloc::System;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_relay::{
    agent::{
        Coordinator, Dispatcher, HostSampler, HttpTransport, PoolConfig, RetryPolicy,
        RuntimeSampler, Sampler, alloc::{INSTRUMENTED_SYSTEM, StatsAlloc},
    },
    config::AgentConfig,
    envelope::{DeliveryMode, EnvelopeBuilder, EnvelopeConfig, PublicKey},
    storage::MemoryBackend,
    util::{init_tracing, shutdown_signal},
};
use tracing::{info, trace};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AgentConfig::load()?;
    init_tracing(&config.log_level, "relay_agent");
    trace!("started with config: {config:?}");

    let public_key = match &config.crypto_key {
        Some(path) => {
            let key = PublicKey::load(path)
                .with_context(|| format!("failed to load public key {}", path.display()))?;
            key.self_check().context("public key failed self-check")?;
            info!("encrypting payloads for {}", path.display());
            Some(key)
        }
        None => None,
    };

    let builder = EnvelopeBuilder::new(EnvelopeConfig {
        mode: if config.batch {
            DeliveryMode::Batch
        } else {
            DeliveryMode::Single
        },
        format: config.format,
        compress: config.compress,
        key: config.key.clone(),
        public_key,
    });

    let transport = HttpTransport::new(&config.address, REQUEST_TIMEOUT)?;
    let store = Arc::new(MemoryBackend::new());

    let samplers: Vec<Arc<dyn Sampler>> = vec![
        Arc::new(RuntimeSampler::new()?),
        Arc::new(HostSampler::new()),
    ];

    let dispatcher = Dispatcher::new(
        store.clone(),
        builder,
        Arc::new(transport),
        RetryPolicy::default(),
    );

    let coordinator = Coordinator::start(
        PoolConfig {
            extraction_workers: config.extraction_workers,
            dispatch_workers: config.rate_limit,
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
        },
        store,
        samplers,
        dispatcher,
    );

    info!("reporting to {} every {:?}", config.address, config.report_interval);
    coordinator.run_until(shutdown_signal()).await;

    Ok(())
}
