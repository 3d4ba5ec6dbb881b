//! In-process buffer of pending log entries.
//!
//! The queue decouples `submit()` callers from network latency: enqueueing is bounded and never
//! blocks, while the uploader thread performs a blocking wait when the queue is empty. Entries
//! that failed a delivery attempt sit in a delayed lane until their backoff expires, so a batch
//! in backoff does not hold up entries behind it.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use crate::log_entry::LogEntry;

/// A log entry waiting for delivery, together with its retry state.
#[derive(Debug)]
pub(crate) struct QueuedLog {
    pub entry: LogEntry,
    /// Number of delivery attempts that have already failed.
    pub attempts: u32,
}

/// Counters describing the fate of every submitted entry.
///
/// Failures on the fire-and-forget path are never raised into caller code; they are recorded
/// here (and logged) instead.
#[derive(Debug, Default)]
pub(crate) struct DeliveryStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_rejected: AtomicU64,
    dropped_shutdown: AtomicU64,
}

impl DeliveryStats {
    pub fn add_submitted(&self, n: u64) {
        self.submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_delivered(&self, n: u64) {
        self.delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_overflow(&self, n: u64) {
        self.dropped_overflow.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_exhausted(&self, n: u64) {
        self.dropped_exhausted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_rejected(&self, n: u64) {
        self.dropped_rejected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_shutdown(&self, n: u64) {
        self.dropped_shutdown.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            dropped_rejected: self.dropped_rejected.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryStatsSnapshot {
    /// Entries handed to `submit()`.
    pub submitted: u64,
    /// Entries the server accepted.
    pub delivered: u64,
    /// Entries dropped because the queue was at capacity.
    pub dropped_overflow: u64,
    /// Entries dropped after exhausting the retry budget.
    pub dropped_exhausted: u64,
    /// Entries the server rejected permanently.
    pub dropped_rejected: u64,
    /// Entries discarded during shutdown flush.
    pub dropped_shutdown: u64,
}

impl DeliveryStatsSnapshot {
    /// Total number of entries dropped for any reason.
    pub fn dropped(&self) -> u64 {
        self.dropped_overflow + self.dropped_exhausted + self.dropped_rejected + self.dropped_shutdown
    }
}

struct QueueInner {
    ready: VecDeque<QueuedLog>,
    /// Entries in backoff, paired with the instant they become due.
    delayed: Vec<(Instant, QueuedLog)>,
    closed: bool,
}

/// Bounded multi-producer queue drained by a single uploader thread.
pub(crate) struct LogQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
    stats: Arc<DeliveryStats>,
}

impl LogQueue {
    pub fn new(capacity: usize, stats: Arc<DeliveryStats>) -> LogQueue {
        LogQueue {
            inner: Mutex::new(QueueInner {
                ready: VecDeque::new(),
                delayed: Vec::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            stats,
        }
    }

    /// Enqueue an entry without blocking. At capacity the oldest pending entry is dropped so the
    /// caller never stalls.
    pub fn push(&self, entry: LogEntry) {
        self.stats.add_submitted(1);

        let mut inner = self.lock();
        if inner.ready.len() + inner.delayed.len() >= self.capacity {
            let QueueInner { ready, delayed, .. } = &mut *inner;
            if ready.pop_front().is_none() {
                // Every pending entry is mid-backoff; sacrifice the one due soonest.
                let oldest = delayed
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, (due, _))| *due)
                    .map(|(index, _)| index);
                if let Some(oldest) = oldest {
                    delayed.swap_remove(oldest);
                }
            }
            self.stats.add_dropped_overflow(1);
            log::warn!(target: "driftballoon", "submission queue full, dropping oldest entry");
        }

        inner.ready.push_back(QueuedLog { entry, attempts: 0 });
        self.available.notify_one();
    }

    /// Reinsert an entry whose delivery failed transiently, due again after `delay`.
    ///
    /// Requeueing after [`LogQueue::close`] discards the entry instead: the shutdown flush is
    /// best-effort for entries that were never tried.
    pub fn requeue(&self, log: QueuedLog, delay: Duration) {
        let mut inner = self.lock();
        if inner.closed {
            self.stats.add_dropped_shutdown(1);
            return;
        }
        inner.delayed.push((Instant::now() + delay, log));
        self.available.notify_one();
    }

    /// Dequeue up to `max` entries, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed and fully drained. After close, delayed
    /// entries are abandoned and only ready entries are handed out, without blocking.
    pub fn next_batch(&self, max: usize) -> Option<Vec<QueuedLog>> {
        let max = max.max(1);
        let mut inner = self.lock();
        loop {
            if inner.closed && !inner.delayed.is_empty() {
                self.stats.add_dropped_shutdown(inner.delayed.len() as u64);
                inner.delayed.clear();
            }

            let now = Instant::now();
            {
                let QueueInner { ready, delayed, .. } = &mut *inner;
                let mut i = 0;
                while i < delayed.len() {
                    if delayed[i].0 <= now {
                        ready.push_back(delayed.swap_remove(i).1);
                    } else {
                        i += 1;
                    }
                }
            }

            if !inner.ready.is_empty() {
                let n = max.min(inner.ready.len());
                return Some(inner.ready.drain(..n).collect());
            }

            if inner.closed {
                return None;
            }

            let next_due = inner.delayed.iter().map(|(due, _)| *due).min();
            match next_due {
                Some(due) => {
                    let wait = due.saturating_duration_since(now);
                    let (guard, _) = self
                        .available
                        .wait_timeout(inner, wait)
                        .expect("thread holding queue lock should not panic");
                    inner = guard;
                }
                None => {
                    inner = self
                        .available
                        .wait(inner)
                        .expect("thread holding queue lock should not panic");
                }
            }
        }
    }

    /// Discard everything still pending. Used when the shutdown flush deadline expires.
    pub fn abandon(&self) -> u64 {
        let mut inner = self.lock();
        let n = (inner.ready.len() + inner.delayed.len()) as u64;
        inner.ready.clear();
        inner.delayed.clear();
        self.stats.add_dropped_shutdown(n);
        n
    }

    /// Signal the uploader thread to flush and exit. Entries may still be pushed; they join the
    /// best-effort flush or accumulate for a later restart.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Accept entries again after the workers from a previous run have exited.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .expect("thread holding queue lock should not panic")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use super::{DeliveryStats, LogQueue, QueuedLog};
    use crate::log_entry::LogEntry;

    fn queue(capacity: usize) -> (LogQueue, Arc<DeliveryStats>) {
        let stats = Arc::new(DeliveryStats::default());
        (LogQueue::new(capacity, stats.clone()), stats)
    }

    fn entry(response: &str) -> LogEntry {
        LogEntry::new("test-prompt", response)
    }

    #[test]
    fn dequeues_in_submission_order() {
        let (queue, _) = queue(10);

        queue.push(entry("first"));
        queue.push(entry("second"));
        queue.push(entry("third"));

        let batch = queue.next_batch(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].entry.response, "first");
        assert_eq!(batch[1].entry.response, "second");

        let batch = queue.next_batch(2).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].entry.response, "third");
    }

    #[test]
    fn overflow_drops_oldest_entry() {
        let (queue, stats) = queue(2);

        queue.push(entry("first"));
        queue.push(entry("second"));
        queue.push(entry("third"));

        let batch = queue.next_batch(10).unwrap();
        let responses: Vec<_> = batch.iter().map(|log| log.entry.response.clone()).collect();
        assert_eq!(responses, ["second", "third"]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 3);
        assert_eq!(snapshot.dropped_overflow, 1);
    }

    #[test]
    fn requeued_entry_waits_out_its_backoff() {
        let (queue, _) = queue(10);
        let delay = Duration::from_millis(50);

        queue.push(entry("flaky"));
        let mut batch = queue.next_batch(1).unwrap();
        let log = batch.pop().unwrap();

        let start = Instant::now();
        queue.requeue(
            QueuedLog {
                entry: log.entry,
                attempts: 1,
            },
            delay,
        );

        let batch = queue.next_batch(1).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert_eq!(batch[0].attempts, 1);
    }

    #[test]
    fn close_drains_ready_and_abandons_delayed() {
        let (queue, stats) = queue(10);

        queue.push(entry("failed once"));
        queue.push(entry("never tried"));
        let mut batch = queue.next_batch(1).unwrap();
        queue.requeue(batch.pop().unwrap(), Duration::from_secs(60));

        queue.close();

        let batch = queue.next_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].entry.response, "never tried");
        assert!(queue.next_batch(10).is_none());
        assert_eq!(stats.snapshot().dropped_shutdown, 1);
    }

    #[test]
    fn close_wakes_a_blocked_consumer() {
        let (queue, _) = queue(10);
        let queue = Arc::new(queue);

        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.next_batch(1))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn reopened_queue_accepts_entries() {
        let (queue, stats) = queue(10);

        queue.close();
        queue.push(entry("while closed"));
        queue.reopen();
        queue.push(entry("after reopen"));

        let batch = queue.next_batch(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(stats.snapshot().submitted, 2);
    }
}
