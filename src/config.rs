use std::time::Duration;

use crate::{
    client::DriftBalloonClient, configuration_fetcher::DEFAULT_BASE_URL,
    poller_thread::PollerThreadConfig, retry::RetryPolicy,
    uploader_thread::UploaderThreadConfig, Result,
};

/// Prefix every DriftBalloon API key is issued with.
pub(crate) const API_KEY_PREFIX: &str = "db_sk_";

/// Configuration for [`DriftBalloonClient`].
///
/// All values are fixed once the client is constructed.
///
/// # Examples
/// ```
/// # use driftballoon::ClientConfig;
/// ClientConfig::from_api_key("db_sk_example");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) sync_interval: Duration,
    pub(crate) sync_jitter: Duration,
    pub(crate) auto_start: bool,
    pub(crate) request_timeout: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) batch_size: usize,
    pub(crate) retry: RetryPolicy,
    pub(crate) flush_deadline: Duration,
}

impl ClientConfig {
    /// Default bound on each individual HTTP request.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default capacity of the submission queue.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use driftballoon::ClientConfig;
    /// ClientConfig::from_api_key("db_sk_example");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            sync_interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            sync_jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
            auto_start: true,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: ClientConfig::DEFAULT_QUEUE_CAPACITY,
            batch_size: UploaderThreadConfig::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            flush_deadline: UploaderThreadConfig::DEFAULT_FLUSH_DEADLINE,
        }
    }

    /// Override base URL for API calls (self-hosted deployments). Clients should use the
    /// default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Override the interval between configuration syncs.
    pub fn sync_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    /// Override the randomized jitter applied to the sync interval.
    pub fn sync_jitter(mut self, sync_jitter: Duration) -> Self {
        self.sync_jitter = sync_jitter;
        self
    }

    /// Whether background workers start at construction. When disabled, call
    /// [`DriftBalloonClient::start`] explicitly.
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Override the per-request HTTP timeout.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Override the submission queue capacity. When full, the oldest pending entry is dropped.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Override the number of entries delivered per request.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the retry policy for log delivery.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long shutdown may spend flushing queued entries.
    pub fn flush_deadline(mut self, flush_deadline: Duration) -> Self {
        self.flush_deadline = flush_deadline;
        self
    }

    /// Create a new [`DriftBalloonClient`] using the specified configuration.
    ///
    /// ```no_run
    /// # use driftballoon::{ClientConfig, DriftBalloonClient};
    /// let client: DriftBalloonClient = ClientConfig::from_api_key("db_sk_example")
    ///     .to_client()
    ///     .expect("api key is well-formed");
    /// ```
    pub fn to_client(self) -> Result<DriftBalloonClient> {
        DriftBalloonClient::new(self)
    }
}
