use std::sync::{Arc, Mutex};

use reqwest::Url;

use crate::{
    baseline_tracker::BaselineTracker,
    config::{ClientConfig, API_KEY_PREFIX},
    configuration::{ActiveVariant, BaselineStatus, PromptConfig},
    configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    configuration_store::ConfigurationStore,
    log_entry::LogEntry,
    log_queue::{DeliveryStats, DeliveryStatsSnapshot, LogQueue},
    log_task::LogTask,
    log_uploader::{LogSink, LogUploader, LogUploaderConfig},
    poller_thread::{PollerThread, PollerThreadConfig},
    uploader_thread::{UploaderThread, UploaderThreadConfig},
    Error, Result,
};

/// A client for the DriftBalloon API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```no_run
/// # use driftballoon::{DriftBalloonClient, ClientConfig};
/// # fn test() -> driftballoon::Result<()> {
/// let client = DriftBalloonClient::new(ClientConfig::from_api_key("db_sk_example"))?;
/// client.log("summarizer", "a response").submit();
/// # Ok(())
/// # }
/// ```
///
/// Each instance owns its own queue, cache, and background workers; multiple instances are fully
/// independent. Dropping the client stops the workers after a bounded flush of queued entries,
/// on all exit paths including unwinding.
pub struct DriftBalloonClient {
    config: ClientConfig,
    store: Arc<ConfigurationStore>,
    tracker: Arc<BaselineTracker>,
    stats: Arc<DeliveryStats>,
    queue: Arc<LogQueue>,
    sink: Arc<dyn LogSink>,
    workers: Mutex<Option<Workers>>,
}

struct Workers {
    poller: PollerThread,
    uploader: UploaderThread,
}

impl DriftBalloonClient {
    /// Create a new `DriftBalloonClient` using the specified configuration.
    ///
    /// Validates that the API key and base URL are well-formed enough to attempt use; the server
    /// is not contacted (startup must not block on network). With `auto_start` enabled (the
    /// default), the background sync loop and submission worker are started immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidApiKey`] if the key doesn't carry the `db_sk_` prefix.
    /// - [`Error::InvalidBaseUrl`] if the base URL doesn't parse.
    pub fn new(config: ClientConfig) -> Result<DriftBalloonClient> {
        if !config.api_key.starts_with(API_KEY_PREFIX) {
            return Err(Error::InvalidApiKey);
        }
        Url::parse(&config.base_url).map_err(Error::InvalidBaseUrl)?;

        let sink = Arc::new(LogUploader::new(LogUploaderConfig {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })?);

        let stats = Arc::new(DeliveryStats::default());
        let client = DriftBalloonClient {
            store: Arc::new(ConfigurationStore::new()),
            tracker: Arc::new(BaselineTracker::new()),
            queue: Arc::new(LogQueue::new(config.queue_capacity, stats.clone())),
            stats,
            sink,
            workers: Mutex::new(None),
            config,
        };

        if client.config.auto_start {
            client.start()?;
        }

        Ok(client)
    }

    #[cfg(test)]
    pub(crate) fn new_with_parts(
        config: ClientConfig,
        store: Arc<ConfigurationStore>,
        sink: Arc<dyn LogSink>,
    ) -> DriftBalloonClient {
        let stats = Arc::new(DeliveryStats::default());
        DriftBalloonClient {
            store,
            tracker: Arc::new(BaselineTracker::new()),
            queue: Arc::new(LogQueue::new(config.queue_capacity, stats.clone())),
            stats,
            sink,
            workers: Mutex::new(None),
            config,
        }
    }

    /// Start the background sync loop and submission worker.
    ///
    /// Does nothing if they are already running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.lock_workers();
        if workers.is_some() {
            return Ok(());
        }

        let fetcher = ConfigurationFetcher::new(ConfigurationFetcherConfig {
            base_url: self.config.base_url.clone(),
            api_key: self.config.api_key.clone(),
            timeout: self.config.request_timeout,
        })?;
        let poller = PollerThread::start(
            fetcher,
            PollerThreadConfig::new(self.store.clone(), self.tracker.clone())
                .with_interval(self.config.sync_interval)
                .with_jitter(self.config.sync_jitter),
        )?;

        let uploader = UploaderThread::start(
            self.sink.clone(),
            self.queue.clone(),
            self.tracker.clone(),
            self.stats.clone(),
            UploaderThreadConfig {
                batch_size: self.config.batch_size,
                retry: self.config.retry.clone(),
                flush_deadline: self.config.flush_deadline,
            },
        );
        let uploader = match uploader {
            Ok(uploader) => uploader,
            Err(err) => {
                poller.stop();
                let _ = poller.shutdown();
                return Err(err);
            }
        };

        *workers = Some(Workers { poller, uploader });
        log::debug!(target: "driftballoon", "background workers started");
        Ok(())
    }

    /// Stop the background workers, flushing queued entries best-effort.
    ///
    /// Blocks at most the configured flush deadline (plus one in-flight request); entries still
    /// unsent after that are discarded and counted. Does nothing if the workers are not
    /// running. The queue keeps accepting entries afterwards, so a stopped client can be
    /// started again.
    pub fn stop(&self) {
        let Some(Workers { poller, uploader }) = self.lock_workers().take() else {
            return;
        };

        log::debug!(target: "driftballoon", "stopping background workers");
        self.queue.close();
        poller.stop();
        if uploader.shutdown().is_err() {
            log::warn!(target: "driftballoon", "uploader thread panicked during shutdown");
        }
        if poller.shutdown().is_err() {
            log::warn!(target: "driftballoon", "poller thread panicked during shutdown");
        }
        self.queue.reopen();
    }

    /// Whether the background workers are currently running.
    pub fn is_running(&self) -> bool {
        self.lock_workers().is_some()
    }

    /// Log an LLM response for drift detection.
    ///
    /// Returns a [`LogTask`]: call [`LogTask::submit`] for fire-and-forget delivery or
    /// [`LogTask::invoke`] to block until the server confirms receipt. Use [`LogTask::prompt`]
    /// and [`LogTask::model`] to attach optional context.
    pub fn log(&self, name: impl Into<String>, response: impl Into<String>) -> LogTask<'_> {
        LogTask::new(self, LogEntry::new(name, response))
    }

    /// Get the full cached configuration for a prompt.
    ///
    /// Served purely from the local cache: never blocks on network and returns `None` for names
    /// the server hasn't reported yet (or at all).
    pub fn get_config(&self, name: &str) -> Option<Arc<PromptConfig>> {
        let Some(configuration) = self.store.get_configuration() else {
            log::debug!(target: "driftballoon", prompt_name = name; "reading configuration before the first successful sync");
            return None;
        };
        configuration.get(name).cloned()
    }

    /// Get the currently active prompt variant for `name`, or `None` if unknown.
    pub fn get_active_prompt(&self, name: &str) -> Option<ActiveVariant> {
        self.get_config(name)?.active_variant
    }

    /// Get the baseline learning status and sample count for a prompt.
    ///
    /// The count is the server-reported value plus deliveries confirmed since the last sync, so
    /// it anticipates the next sync. A prompt the server hasn't reported yet is conservatively
    /// `(Learning, 0)`.
    pub fn get_baseline_status(&self, name: &str) -> (BaselineStatus, u64) {
        let pending = self.tracker.pending(name);
        match self.get_config(name) {
            Some(config) => (config.baseline_status, config.sample_count + pending),
            None => (BaselineStatus::Learning, pending),
        }
    }

    /// Block until the first configuration sync completes.
    ///
    /// Until this returns, reads fall back to the unknown-name defaults.
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`] if the background workers are not running, or the unrecoverable
    /// error that stopped the sync loop.
    pub fn wait_for_configuration(&self) -> Result<()> {
        match &*self.lock_workers() {
            Some(workers) => workers.poller.wait_for_configuration(),
            None => Err(Error::NotStarted),
        }
    }

    /// A snapshot of the delivery counters (submitted, delivered, dropped).
    ///
    /// This is the passive failure surface for the fire-and-forget path: delivery problems are
    /// never raised into caller code, they show up here and in the logs.
    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn enqueue(&self, entry: LogEntry) {
        self.queue.push(entry);
    }

    pub(crate) fn deliver_sync(&self, entry: LogEntry) -> Result<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.sink.send_logs(std::slice::from_ref(&entry)) {
                Ok(()) => {
                    self.tracker.record_delivery(&entry.name);
                    self.stats.add_delivered(1);
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.stats.add_dropped_rejected(1);
                return Err(err);
            }
            match self.config.retry.next_delay(attempts) {
                Some(delay) => {
                    log::debug!(target: "driftballoon", "synchronous delivery failed, retrying in {delay:?}: {err}");
                    std::thread::sleep(delay);
                }
                None => {
                    self.stats.add_dropped_exhausted(1);
                    return Err(err);
                }
            }
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Option<Workers>> {
        self.workers
            .lock()
            .expect("thread holding workers lock should not panic")
    }
}

impl Drop for DriftBalloonClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use reqwest::StatusCode;

    use super::DriftBalloonClient;
    use crate::{
        configuration::{ActiveVariant, BaselineStatus, Configuration, PromptConfig},
        configuration_store::ConfigurationStore,
        log_entry::LogEntry,
        log_uploader::LogSink,
        retry::RetryPolicy,
        ClientConfig, Error, Result,
    };

    /// Fails the first `fail_first` calls with `error`, records everything it accepts.
    struct TestSink {
        calls: AtomicUsize,
        fail_first: usize,
        error: Option<Error>,
        recorded: Mutex<Vec<LogEntry>>,
    }

    impl TestSink {
        fn ok() -> TestSink {
            TestSink::failing(0, None)
        }

        fn failing(fail_first: usize, error: Option<Error>) -> TestSink {
            TestSink {
                calls: AtomicUsize::new(0),
                fail_first,
                error,
                recorded: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn recorded(&self) -> Vec<LogEntry> {
            self.recorded.lock().unwrap().clone()
        }
    }

    impl LogSink for TestSink {
        fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(self.error.clone().expect("failing sink needs an error"));
            }
            self.recorded.lock().unwrap().extend_from_slice(entries);
            Ok(())
        }
    }

    fn server_error() -> Error {
        Error::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig::from_api_key("db_sk_test1234567890ab")
            // Nothing is listening here; the poller fails fast and serves stale data, which is
            // exactly what these tests want.
            .base_url("http://127.0.0.1:9")
            .auto_start(false)
            .sync_interval(Duration::from_secs(60))
            .sync_jitter(Duration::ZERO)
            .request_timeout(Duration::from_millis(200))
            .retry(RetryPolicy {
                base_delay: Duration::from_millis(2),
                max_delay: Duration::from_millis(10),
                max_attempts: 5,
                jitter_factor: 0.0,
            })
            .flush_deadline(Duration::from_secs(2))
    }

    fn test_client(sink: TestSink) -> (DriftBalloonClient, Arc<TestSink>, Arc<ConfigurationStore>) {
        let sink = Arc::new(sink);
        let store = Arc::new(ConfigurationStore::new());
        let client =
            DriftBalloonClient::new_with_parts(test_config(), store.clone(), sink.clone());
        (client, sink, store)
    }

    fn sample_prompt(name: &str) -> PromptConfig {
        PromptConfig {
            name: name.to_owned(),
            active_variant: Some(ActiveVariant::B),
            prompt_a: Some("Summarize briefly".to_owned()),
            prompt_b: Some("Summarize in one sentence".to_owned()),
            baseline_status: BaselineStatus::Ready,
            sample_count: 50,
            min_baseline_samples: 30,
            drift_threshold: 0.7,
            length_drift_threshold: 1.5,
            auto_switch_enabled: true,
            fetched_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn rejects_malformed_api_keys() {
        assert!(matches!(
            ClientConfig::from_api_key("").to_client(),
            Err(Error::InvalidApiKey)
        ));
        assert!(matches!(
            ClientConfig::from_api_key("invalid_key").to_client(),
            Err(Error::InvalidApiKey)
        ));
    }

    #[test]
    fn accepts_well_formed_api_key_without_contacting_the_server() {
        let client = test_config().to_client().unwrap();

        assert!(!client.is_running());
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = ClientConfig::from_api_key("db_sk_test1234567890ab")
            .base_url("not a url")
            .auto_start(false)
            .to_client();

        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn reads_fall_back_to_defaults_before_first_sync() {
        let client = test_config().to_client().unwrap();

        assert!(client.get_config("summarizer").is_none());
        assert!(client.get_active_prompt("summarizer").is_none());
        assert_eq!(
            client.get_baseline_status("summarizer"),
            (BaselineStatus::Learning, 0)
        );
    }

    #[test]
    fn reads_are_served_from_the_cached_snapshot() {
        let (client, _, store) = test_client(TestSink::ok());
        store.set_configuration(Arc::new(Configuration::from_prompts([sample_prompt(
            "summarizer",
        )])));

        let config = client.get_config("summarizer").unwrap();
        assert_eq!(config.sample_count, 50);
        assert_eq!(
            client.get_active_prompt("summarizer"),
            Some(ActiveVariant::B)
        );
        assert_eq!(
            client.get_baseline_status("summarizer"),
            (BaselineStatus::Ready, 50)
        );
    }

    #[test]
    fn unknown_prompt_reports_learning_with_zero_samples() {
        let (client, _, store) = test_client(TestSink::ok());
        store.set_configuration(Arc::new(Configuration::from_prompts([sample_prompt(
            "summarizer",
        )])));

        assert!(client.get_active_prompt("unknown-name").is_none());
        assert_eq!(
            client.get_baseline_status("unknown-name"),
            (BaselineStatus::Learning, 0)
        );
    }

    #[test]
    fn submit_queues_without_touching_the_network() {
        let (client, sink, _) = test_client(TestSink::failing(usize::MAX, Some(server_error())));

        client
            .log("summarizer", "a response")
            .prompt("Summarize this")
            .model("gpt-4")
            .submit();

        let stats = client.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(sink.calls(), 0);
    }

    #[test]
    fn invoke_delivers_synchronously() {
        let (client, sink, _) = test_client(TestSink::ok());

        client.log("summarizer", "a response").invoke().unwrap();

        assert_eq!(sink.recorded().len(), 1);
        assert_eq!(sink.recorded()[0].response, "a response");
        assert_eq!(client.stats().delivered, 1);
    }

    #[test]
    fn invoke_retries_transient_failures() {
        let (client, sink, _) = test_client(TestSink::failing(1, Some(server_error())));

        client.log("summarizer", "flaky").invoke().unwrap();

        assert_eq!(sink.calls(), 2);
        assert_eq!(client.stats().delivered, 1);
    }

    #[test]
    fn invoke_does_not_retry_permanent_failures() {
        let rejected = Error::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
        };
        let (client, sink, _) = test_client(TestSink::failing(usize::MAX, Some(rejected)));

        let result = client.log("summarizer", "bad").invoke();

        assert!(matches!(result, Err(Error::Rejected { .. })));
        assert_eq!(sink.calls(), 1);
        assert_eq!(client.stats().dropped_rejected, 1);
    }

    #[test]
    fn invoke_gives_up_after_the_retry_budget() {
        let (client, sink, _) = test_client(TestSink::failing(usize::MAX, Some(server_error())));

        let result = client.log("summarizer", "doomed").invoke();

        assert!(result.is_err());
        assert_eq!(sink.calls(), 5);
        assert_eq!(client.stats().dropped_exhausted, 1);
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn background_worker_flushes_submitted_entries() {
        init_logging();
        let (client, sink, _) = test_client(TestSink::ok());

        client.start().unwrap();
        assert!(client.is_running());
        for i in 0..3 {
            client.log("summarizer", format!("response {i}")).submit();
        }
        std::thread::sleep(Duration::from_millis(100));
        client.stop();

        assert!(!client.is_running());
        assert_eq!(client.stats().delivered, 3);
        assert_eq!(sink.recorded().len(), 3);

        // Stopping again is a no-op.
        client.stop();
    }

    #[test]
    fn drop_flushes_queued_entries() {
        let (client, sink, _) = test_client(TestSink::ok());
        client.start().unwrap();

        client.log("summarizer", "queued just before drop").submit();
        drop(client);

        assert_eq!(sink.recorded().len(), 1);
    }

    #[test]
    fn baseline_status_anticipates_deliveries_since_last_sync() {
        let (client, _, store) = test_client(TestSink::ok());

        client.log("summarizer", "one").invoke().unwrap();
        client.log("summarizer", "two").invoke().unwrap();

        assert_eq!(
            client.get_baseline_status("summarizer"),
            (BaselineStatus::Learning, 2)
        );

        store.set_configuration(Arc::new(Configuration::from_prompts([sample_prompt(
            "summarizer",
        )])));
        assert_eq!(
            client.get_baseline_status("summarizer"),
            (BaselineStatus::Ready, 52)
        );
    }

    #[test]
    fn client_instances_are_independent() {
        let (first, _, _) = test_client(TestSink::ok());
        let (second, _, _) = test_client(TestSink::ok());

        first.log("summarizer", "only for the first").submit();

        assert_eq!(first.stats().submitted, 1);
        assert_eq!(second.stats().submitted, 0);
    }

    #[test]
    fn wait_for_configuration_requires_running_workers() {
        let (client, _, _) = test_client(TestSink::ok());

        assert!(matches!(
            client.wait_for_configuration(),
            Err(Error::NotStarted)
        ));
    }
}
