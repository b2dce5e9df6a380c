// Retry worker
//
// Background loop that claims due retries from the queue and spawns one task per
// retry, bounded by a semaphore. The loop never waits for a claimed retry, so a slow
// subscription cannot hold back retries of other subscriptions. A periodic sweep
// requeues deliveries stranded without a queue entry.
//
// Shutdown is signalled through a watch channel; in-flight retries are allowed to
// finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, DEFAULT_STALE_AFTER};

/// Lower bound for the poll and recovery intervals
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Retry worker configuration
#[derive(Debug, Clone)]
pub struct RetryWorkerConfig {
    /// How often the queue is polled
    pub poll_interval: Duration,
    /// Maximum retries claimed per poll
    pub batch_size: usize,
    /// Maximum retries running at once
    pub max_in_flight: usize,
    /// How often stalled deliveries are swept
    pub recovery_interval: Duration,
    /// Age after which an unfinished delivery with no queue entry is requeued
    pub stale_after: Duration,
}

impl Default for RetryWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 32,
            max_in_flight: 64,
            recovery_interval: Duration::from_secs(60),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl RetryWorkerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Polls the retry queue on a fixed interval
pub struct RetryWorker {
    dispatcher: Arc<Dispatcher>,
    config: RetryWorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryWorker {
    pub fn new(dispatcher: Arc<Dispatcher>, config: RetryWorkerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dispatcher,
            config,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Start the poll loop. Calling this on a running worker is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let poll_interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let recovery_interval = self.config.recovery_interval.max(MIN_POLL_INTERVAL);
        let batch_size = self.config.batch_size.max(1);
        let max_in_flight = self.config.max_in_flight.max(1);
        let stale_after = self.config.stale_after;

        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size,
            max_in_flight,
            "Starting retry worker"
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(max_in_flight));
            let mut in_flight: JoinSet<bool> = JoinSet::new();

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately, so the sweep also runs at startup
            let mut recovery = tokio::time::interval(recovery_interval);
            recovery.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = recovery.tick() => {
                        match dispatcher.recover_stalled(Utc::now(), stale_after, batch_size).await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "Requeued stalled deliveries"),
                            Err(e) => error!(error = %e, "Stalled delivery sweep failed"),
                        }
                    }
                    _ = ticker.tick() => {
                        reap_finished(&mut in_flight);

                        let available = permits.available_permits().min(batch_size);
                        if available == 0 {
                            debug!("Retry worker: all slots busy");
                            continue;
                        }

                        let claimed = match dispatcher.claim_due_retries(Utc::now(), available).await {
                            Ok(claimed) => claimed,
                            Err(e) => {
                                error!(error = %e, "Retry poll failed");
                                continue;
                            }
                        };
                        if !claimed.is_empty() {
                            debug!(count = claimed.len(), "Claimed due retries");
                        }

                        for retry in claimed {
                            // Unstarted claims become due again when their lease expires
                            let permit = match Arc::clone(&permits).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    debug!("No permits available");
                                    break;
                                }
                            };
                            let dispatcher = Arc::clone(&dispatcher);
                            in_flight.spawn(async move {
                                let done = dispatcher.run_claimed(&retry).await;
                                drop(permit);
                                done
                            });
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Retry worker: shutdown requested");
                        break;
                    }
                }
            }

            if !in_flight.is_empty() {
                debug!(count = in_flight.len(), "Waiting for in-flight retries");
            }
            while let Some(result) = in_flight.join_next().await {
                log_join(result);
            }

            debug!("Retry worker loop exited");
        }));
    }

    /// Signal shutdown and wait for the loop and its in-flight retries to exit
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Retry worker task failed");
            }
        }
        info!("Retry worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn reap_finished(in_flight: &mut JoinSet<bool>) {
    while let Some(result) = in_flight.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: std::result::Result<bool, tokio::task::JoinError>) {
    match result {
        Ok(true) => {}
        Ok(false) => debug!("Retry left claimed until its lease expires"),
        Err(e) => warn!(error = %e, "Retry task panicked or was cancelled"),
    }
}
