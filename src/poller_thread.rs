//! A background poller thread that periodically requests prompt configuration from the server
//! and stores it in a configuration store.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    baseline_tracker::BaselineTracker,
    configuration_fetcher::ConfigurationSource,
    configuration_store::ConfigurationStore,
    Error, Result,
};

/// Configuration for [`PollerThread`].
#[derive(Clone)]
pub struct PollerThreadConfig {
    /// Store receiving each fetched snapshot.
    pub store: Arc<ConfigurationStore>,
    /// Tracker reset on every successful sync.
    pub tracker: Arc<BaselineTracker>,
    /// Interval to wait between requests for configuration.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests for configuration. This
    /// helps to avoid multiple client instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `PollerThreadConfig` with default interval and jitter.
    pub fn new(store: Arc<ConfigurationStore>, tracker: Arc<BaselineTracker>) -> PollerThreadConfig {
        PollerThreadConfig {
            store,
            tracker,
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

/// A configuration poller thread.
///
/// The poller thread polls the server periodically to fetch the latest configuration using a
/// [`ConfigurationSource`] and stores it in a [`ConfigurationStore`]. The first fetch happens
/// immediately on start, so early reads are not stale-empty. A failed fetch leaves the previous
/// snapshot untouched; reads keep returning the last good data.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` if configuration hasn't been fetched yet. Holds `Some(Ok(()))` if
    /// configuration has been fetched successfully. Holds `Some(Err(...))` if there was an
    /// unrecoverable error fetching the configuration.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Start the configuration poller thread.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the poller thread failed to start.
    pub fn start<S: ConfigurationSource>(
        mut source: S,
        config: PollerThreadConfig,
    ) -> Result<PollerThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between
        // threads). Buffer size of 1 is enough as we're sending a single stop command; if the
        // buffer is full, another thread has sent a stop command already.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value| {
                *result.0.lock().expect("thread holding result lock should not panic") = Some(value);
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("driftballoon-poller".to_owned())
                .spawn(move || loop {
                    log::debug!(target: "driftballoon", "fetching new configuration");
                    match source.fetch_configuration() {
                        Ok(configuration) => {
                            config.store.set_configuration(Arc::new(configuration));
                            config.tracker.mark_synced();
                            update_result(Ok(()));
                        }
                        Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => {
                            // Unrecoverable errors. Reads keep serving the last snapshot.
                            update_result(Err(err));
                            return;
                        }
                        Err(err) => {
                            log::warn!(target: "driftballoon", "failed to sync configuration, serving cached data: {err}");
                        }
                    }

                    let timeout = jitter(config.interval, config.jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            // Timed out. Loop back to fetch a new configuration.
                        }
                        Ok(()) => {
                            log::debug!(target: "driftballoon", "poller thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // When the other end of channel disconnects, calls to
                            // .recv_timeout() return immediately. Stop the thread.
                            log::debug!(target: "driftballoon", "poller thread received disconnected");
                            return;
                        }
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block waiting for the first configuration fetch to complete.
    ///
    /// Returns `Ok(())` once a configuration snapshot has been stored, or the unrecoverable
    /// error that stopped the poller.
    pub fn wait_for_configuration(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => {
                    // The poller has already fetched the configuration. Return Ok(()) or a
                    // possible error.
                    return result.clone();
                }
                None => {
                    // Block waiting for configuration to get fetched.
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the channel buffer is
        // full (another thread sent a stop command already). Both can be ignored.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        // Error means that the thread has panicked and there's nothing useful we can do in that
        // case.
        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}


#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::Utc;
    use reqwest::StatusCode;

    use super::{PollerThread, PollerThreadConfig};
    use crate::{
        baseline_tracker::BaselineTracker,
        configuration::{BaselineStatus, Configuration, PromptConfig},
        configuration_store::ConfigurationStore,
        Error,
    };

    fn sample_prompt(name: &str, sample_count: u64) -> PromptConfig {
        PromptConfig {
            name: name.to_owned(),
            active_variant: None,
            prompt_a: None,
            prompt_b: None,
            baseline_status: BaselineStatus::Learning,
            sample_count,
            min_baseline_samples: 30,
            drift_threshold: 0.7,
            length_drift_threshold: 1.5,
            auto_switch_enabled: true,
            fetched_at: Utc::now(),
        }
    }

    fn config(store: &Arc<ConfigurationStore>, tracker: &Arc<BaselineTracker>) -> PollerThreadConfig {
        PollerThreadConfig::new(store.clone(), tracker.clone())
            .with_interval(Duration::from_millis(5))
            .with_jitter(Duration::ZERO)
    }

    #[test]
    fn successful_sync_replaces_the_snapshot() {
        let store = Arc::new(ConfigurationStore::new());
        let tracker = Arc::new(BaselineTracker::new());

        let poller = PollerThread::start(
            || Ok(Configuration::from_prompts([sample_prompt("summarizer", 5)])),
            config(&store, &tracker),
        )
        .unwrap();
        poller.wait_for_configuration().unwrap();

        let configuration = store.get_configuration().unwrap();
        assert_eq!(configuration.get("summarizer").unwrap().sample_count, 5);

        poller.shutdown().unwrap();
    }

    #[test]
    fn failed_sync_leaves_previous_snapshot_untouched() {
        let store = Arc::new(ConfigurationStore::new());
        let tracker = Arc::new(BaselineTracker::new());

        let mut calls = 0;
        let source = move || {
            calls += 1;
            if calls == 1 {
                Ok(Configuration::from_prompts([sample_prompt("summarizer", 5)]))
            } else {
                Err(Error::Server {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                })
            }
        };

        let poller = PollerThread::start(source, config(&store, &tracker)).unwrap();
        poller.wait_for_configuration().unwrap();
        // Let several failing sync cycles pass.
        std::thread::sleep(Duration::from_millis(50));

        let configuration = store.get_configuration().unwrap();
        assert_eq!(configuration.get("summarizer").unwrap().sample_count, 5);

        poller.shutdown().unwrap();
    }

    #[test]
    fn name_absent_from_fresh_sync_is_cleared() {
        let store = Arc::new(ConfigurationStore::new());
        let tracker = Arc::new(BaselineTracker::new());

        let mut calls = 0;
        let source = move || {
            calls += 1;
            if calls == 1 {
                Ok(Configuration::from_prompts([
                    sample_prompt("kept", 1),
                    sample_prompt("removed", 1),
                ]))
            } else {
                Ok(Configuration::from_prompts([sample_prompt("kept", 2)]))
            }
        };

        let poller = PollerThread::start(source, config(&store, &tracker)).unwrap();
        poller.wait_for_configuration().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let configuration = store.get_configuration().unwrap();
        assert!(configuration.get("kept").is_some());
        assert!(configuration.get("removed").is_none());

        poller.shutdown().unwrap();
    }

    #[test]
    fn successful_sync_resets_pending_deliveries() {
        let store = Arc::new(ConfigurationStore::new());
        let tracker = Arc::new(BaselineTracker::new());
        tracker.record_delivery("summarizer");

        let poller = PollerThread::start(
            || Ok(Configuration::from_prompts([sample_prompt("summarizer", 1)])),
            config(&store, &tracker),
        )
        .unwrap();
        poller.wait_for_configuration().unwrap();

        assert_eq!(tracker.pending("summarizer"), 0);

        poller.shutdown().unwrap();
    }

    #[test]
    fn unauthorized_stops_the_poller() {
        let store = Arc::new(ConfigurationStore::new());
        let tracker = Arc::new(BaselineTracker::new());

        let poller =
            PollerThread::start(|| Err(Error::Unauthorized), config(&store, &tracker)).unwrap();

        assert!(matches!(
            poller.wait_for_configuration(),
            Err(Error::Unauthorized)
        ));
        assert!(store.get_configuration().is_none());

        poller.shutdown().unwrap();
    }
}
