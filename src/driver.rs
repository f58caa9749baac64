//! State-Machine Driver
//!
//! The polling engine: each iteration leases a batch of processes per
//! monitored (state, type) filter and hands them to the delegate. The
//! delegate owns saving (and thereby lease release) on every path, including
//! declines. An idle iteration sleeps per the wait strategy; any processed
//! item resets the wait to its minimum.
//!
//! Multiple drivers may run against one shared store, on this or other
//! runtime instances; exclusivity comes from the store's leases alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::ServiceError;
use crate::process::TransferProcess;
use crate::store::{ProcessFilter, TransferProcessStore};

/// Controls how long an idle driver sleeps between iterations
pub trait WaitStrategy: Send {
    /// Delay before the next iteration after an idle one
    fn next_wait(&mut self) -> Duration;
    /// An item was processed; drop back to the minimum wait
    fn reset(&mut self);
}

/// Doubles the idle wait up to a bound, avoiding busy-polling a quiet store
#[derive(Debug, Clone)]
pub struct ExponentialWaitStrategy {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialWaitStrategy {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = (self.current * 2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// The driver's view of an orchestrator: which states to poll, and how to
/// process one leased item.
#[async_trait]
pub trait ProcessorDelegate: Send + Sync {
    /// (state, type) filters to poll, in order
    fn monitored(&self) -> Vec<ProcessFilter>;

    /// Process one leased item. Returns true if the process advanced. Every
    /// path, including a decline (pending guard, backoff gate), must save
    /// the process to break the lease.
    async fn process(&self, process: TransferProcess) -> Result<bool, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub batch_size: usize,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            wait_min: Duration::from_millis(50),
            wait_max: Duration::from_secs(5),
        }
    }
}

/// Polling loop over the store, bound to one delegate
pub struct StateMachineDriver<D> {
    store: Arc<dyn TransferProcessStore>,
    delegate: Arc<D>,
    config: DriverConfig,
    shutdown: watch::Sender<bool>,
}

impl<D: ProcessorDelegate + 'static> StateMachineDriver<D> {
    pub fn new(store: Arc<dyn TransferProcessStore>, delegate: Arc<D>, config: DriverConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            delegate,
            config,
            shutdown,
        }
    }

    /// Spawn the polling loop on the runtime
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Signal the loop to exit. An in-flight item finishes its current
    /// action first; its lease is released by the delegate's save.
    ///
    /// The flag is latched in the channel itself, so a stop issued before
    /// the loop subscribes (or after it exited) is still observed.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until stopped
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut wait = ExponentialWaitStrategy::new(self.config.wait_min, self.config.wait_max);

        info!(batch_size = self.config.batch_size, "transfer driver started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = self.iterate_once().await;
            if processed > 0 {
                wait.reset();
                continue;
            }

            let idle = wait.next_wait();
            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("transfer driver stopped");
    }

    /// One full pass over every monitored filter; returns how many processes
    /// advanced. Public so tests can drive iterations deterministically.
    pub async fn iterate_once(&self) -> usize {
        let mut advanced = 0;

        for filter in self.delegate.monitored() {
            let batch = match self
                .store
                .next_not_leased(self.config.batch_size, &filter)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(state = %filter.state, error = %e, "batch selection failed");
                    continue;
                }
            };

            for process in batch {
                let id = process.id;
                let state = process.state;
                match self.delegate.process(process).await {
                    Ok(true) => {
                        advanced += 1;
                    }
                    Ok(false) => {
                        debug!(process_id = %id, state = %state, "not advanced");
                    }
                    Err(e) => {
                        // Lease expiry will make the process eligible again
                        error!(process_id = %id, state = %state, error = %e, "processing failed");
                    }
                }
            }
        }

        advanced
    }
}
