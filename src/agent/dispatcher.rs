//! Periodic delivery of the agent's store
//!
//! ```text
//! tick → get_all → EnvelopeBuilder → job queue → dispatch workers → Transport
//!                                                       │
//!                                 retry with 1s, 3s, 5s ┘
//! ```
//!
//! A scheduler task builds the cycle's envelopes and queues one job per
//! envelope. M dispatch workers take jobs off the shared queue and report
//! each outcome back; the cycle ends once every job has reported. Failed
//! deliveries are logged and dropped, so one bad cycle never holds up the
//! next.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::transport::{Transport, TransportError};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::storage::MemoryBackend;

/// Fixed delays between delivery attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    /// Initial attempt plus one per delay
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    GaveUp { attempts: usize, error: TransportError },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::GaveUp { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Send `envelope`, retrying retryable failures per `policy`
pub async fn send_with_retry(
    transport: &dyn Transport,
    envelope: &Envelope,
    policy: &RetryPolicy,
) -> DeliveryOutcome {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match transport.send(envelope).await {
            Ok(()) => return DeliveryOutcome::Delivered { attempts },
            Err(error) => error,
        };

        let delay = match policy.delays.get(attempts - 1) {
            Some(delay) if error.is_retryable() => *delay,
            _ => return DeliveryOutcome::GaveUp { attempts, error },
        };

        warn!(
            "delivery attempt {}/{} failed, retrying in {:?}: {}",
            attempts,
            policy.max_attempts(),
            delay,
            error
        );
        tokio::time::sleep(delay).await;
    }
}

/// Totals of one reporting cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub envelopes: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Jobs whose worker went away before reporting
    pub abandoned: usize,
}

pub(crate) struct Job {
    envelope: Envelope,
    done: oneshot::Sender<DeliveryOutcome>,
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<MemoryBackend>,
    builder: EnvelopeBuilder,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<MemoryBackend>,
        builder: EnvelopeBuilder,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            builder,
            transport,
            policy,
        }
    }

    /// Start the scheduler and `workers` dispatch workers
    ///
    /// All tasks stop once `cancel` fires; deliveries already in progress
    /// finish first.
    pub fn spawn(
        self,
        workers: usize,
        report_interval: Duration,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let workers = workers.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(workers);
        let queue: JobQueue = Arc::new(Mutex::new(jobs_rx));

        let mut handles: Vec<_> = (0..workers)
            .map(|id| {
                tokio::spawn(dispatch_worker(
                    id,
                    queue.clone(),
                    self.transport.clone(),
                    self.policy.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        handles.push(tokio::spawn(self.schedule(jobs_tx, report_interval, cancel)));
        handles
    }

    #[instrument(skip_all)]
    async fn schedule(
        self,
        jobs: mpsc::Sender<Job>,
        report_interval: Duration,
        cancel: CancellationToken,
    ) {
        debug!("dispatch scheduler started");
        let mut ticker = tokio::time::interval(report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first report after one full interval
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&jobs).await;
            if report.envelopes > 0 {
                info!(
                    "report cycle: {} delivered, {} failed, {} abandoned",
                    report.delivered, report.failed, report.abandoned
                );
            }
            // a full interval passes between the end of one cycle and the next
            ticker.reset();
        }

        debug!("dispatch scheduler stopped");
    }

    /// Build this cycle's envelopes, queue them and wait for every outcome
    pub(crate) async fn run_cycle(&self, jobs: &mpsc::Sender<Job>) -> CycleReport {
        let envelopes = match self.builder.build(&self.store.snapshot()) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                error!("failed to build envelopes: {e}");
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            envelopes: envelopes.len(),
            ..Default::default()
        };
        if envelopes.is_empty() {
            debug!("store empty, nothing to report");
            return report;
        }

        let mut pending = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let (done, outcome) = oneshot::channel();
            if jobs.send(Job { envelope, done }).await.is_err() {
                report.abandoned += 1;
                continue;
            }
            pending.push(outcome);
        }

        for outcome in join_all(pending).await {
            match outcome {
                Ok(outcome) if outcome.is_delivered() => report.delivered += 1,
                Ok(_) => report.failed += 1,
                Err(_) => report.abandoned += 1,
            }
        }

        report
    }
}

#[instrument(skip_all, fields(worker = id))]
async fn dispatch_worker(
    id: usize,
    queue: JobQueue,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    debug!("dispatch worker started");

    loop {
        let job = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = queue.recv() => job,
            }
        };

        let Some(job) = job else { break };

        let outcome = send_with_retry(transport.as_ref(), &job.envelope, &policy).await;
        if let DeliveryOutcome::GaveUp { attempts, error } = &outcome {
            error!(
                "giving up on {} metrics after {} attempts: {}",
                job.envelope.metric_count, attempts, error
            );
        }

        // the scheduler may already be gone on shutdown
        let _ = job.done.send(outcome);
    }

    debug!("dispatch worker stopped");
}
