//! A background worker thread that drains the submission queue and delivers log batches.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    baseline_tracker::BaselineTracker,
    log_queue::{DeliveryStats, LogQueue, QueuedLog},
    log_uploader::LogSink,
    retry::RetryPolicy,
    Error, Result,
};

/// Configuration for [`UploaderThread`].
#[derive(Debug, Clone)]
pub struct UploaderThreadConfig {
    /// Maximum number of entries delivered per request.
    ///
    /// Defaults to [`UploaderThreadConfig::DEFAULT_BATCH_SIZE`].
    pub batch_size: usize,
    /// Backoff schedule for transient delivery failures.
    pub retry: RetryPolicy,
    /// How long the shutdown flush may keep delivering before pending entries are discarded.
    ///
    /// Defaults to [`UploaderThreadConfig::DEFAULT_FLUSH_DEADLINE`].
    pub flush_deadline: Duration,
}

impl UploaderThreadConfig {
    /// Default value for [`UploaderThreadConfig::batch_size`].
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    /// Default value for [`UploaderThreadConfig::flush_deadline`].
    pub const DEFAULT_FLUSH_DEADLINE: Duration = Duration::from_secs(5);
}

impl Default for UploaderThreadConfig {
    fn default() -> UploaderThreadConfig {
        UploaderThreadConfig {
            batch_size: UploaderThreadConfig::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            flush_deadline: UploaderThreadConfig::DEFAULT_FLUSH_DEADLINE,
        }
    }
}

/// The submission worker thread.
///
/// Continuously dequeues batches from the [`LogQueue`] and delivers them through a [`LogSink`].
/// Transient failures go back into the queue's retry timeline; permanent failures are dropped
/// and counted. Failures never propagate anywhere near caller code.
pub struct UploaderThread {
    join_handle: std::thread::JoinHandle<()>,
}

impl UploaderThread {
    /// Start the submission worker thread.
    ///
    /// The thread runs until the queue is closed and either drained or past the flush deadline.
    pub fn start(
        sink: Arc<dyn LogSink>,
        queue: Arc<LogQueue>,
        tracker: Arc<BaselineTracker>,
        stats: Arc<DeliveryStats>,
        config: UploaderThreadConfig,
    ) -> Result<UploaderThread> {
        let join_handle = std::thread::Builder::new()
            .name("driftballoon-uploader".to_owned())
            .spawn(move || {
                let mut flush_deadline: Option<Instant> = None;
                loop {
                    if queue.is_closed() {
                        let deadline = *flush_deadline
                            .get_or_insert_with(|| Instant::now() + config.flush_deadline);
                        if Instant::now() >= deadline {
                            let abandoned = queue.abandon();
                            if abandoned > 0 {
                                log::warn!(target: "driftballoon", abandoned; "flush deadline expired, discarding pending entries");
                            }
                            return;
                        }
                    }

                    let Some(batch) = queue.next_batch(config.batch_size) else {
                        return;
                    };
                    deliver_batch(&*sink, batch, &queue, &tracker, &stats, &config.retry);
                }
            })?;

        Ok(UploaderThread { join_handle })
    }

    /// Block waiting for the worker to exit. Call [`LogQueue::close`] first, otherwise this
    /// waits forever.
    pub fn shutdown(self) -> Result<()> {
        self.join_handle
            .join()
            .map_err(|_| Error::UploaderThreadPanicked)?;

        Ok(())
    }
}

fn deliver_batch(
    sink: &dyn LogSink,
    batch: Vec<QueuedLog>,
    queue: &LogQueue,
    tracker: &BaselineTracker,
    stats: &DeliveryStats,
    retry: &RetryPolicy,
) {
    let entries: Vec<_> = batch.iter().map(|queued| queued.entry.clone()).collect();

    match sink.send_logs(&entries) {
        Ok(()) => {
            for queued in &batch {
                tracker.record_delivery(&queued.entry.name);
            }
            stats.add_delivered(batch.len() as u64);
            log::debug!(target: "driftballoon", count = batch.len(); "delivered log batch");
        }
        Err(err) if err.is_retryable() => {
            log::warn!(target: "driftballoon", "log submission failed, scheduling retry: {err}");
            for mut queued in batch {
                queued.attempts += 1;
                match retry.next_delay(queued.attempts) {
                    Some(delay) => queue.requeue(queued, delay),
                    None => {
                        stats.add_dropped_exhausted(1);
                        log::warn!(target: "driftballoon", prompt_name = queued.entry.name.as_str(); "retry budget exhausted, dropping entry");
                    }
                }
            }
        }
        Err(err) => {
            stats.add_dropped_rejected(batch.len() as u64);
            log::warn!(target: "driftballoon", count = batch.len(); "log submission rejected, dropping batch: {err}");
        }
    }
}
