//! An HTTP client that ships log batches to the ingestion endpoint.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use reqwest::Url;
use serde::Serialize;

use crate::{
    configuration_fetcher::{API_KEY_HEADER, USER_AGENT},
    log_entry::LogEntry,
    Error, Result,
};

const LOGS_ENDPOINT: &str = "/api/v1/logs";

/// Anything log entries can be delivered through.
///
/// Implemented by [`LogUploader`] for the real server, and by any compatible closure, which is
/// how tests record deliveries and simulate failures.
pub trait LogSink: Send + Sync + 'static {
    /// Deliver a batch of entries. `Ok` means the server accepted every entry in the batch.
    fn send_logs(&self, entries: &[LogEntry]) -> Result<()>;
}

impl<F> LogSink for F
where
    F: Fn(&[LogEntry]) -> Result<()> + Send + Sync + 'static,
{
    fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        self(entries)
    }
}

#[derive(Serialize)]
struct LogBatch<'a> {
    logs: &'a [LogEntry],
}

pub(crate) struct LogUploaderConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bound on each submission request.
    pub timeout: Duration,
}

/// A client that submits log batches to the server.
pub(crate) struct LogUploader {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: LogUploaderConfig,
    /// Set once a request comes back 401/403. Later sends fail fast instead of hammering the
    /// server with a key it already refused.
    unauthorized: AtomicBool,
}

impl LogUploader {
    pub fn new(config: LogUploaderConfig) -> Result<LogUploader> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(LogUploader {
            client,
            config,
            unauthorized: AtomicBool::new(false),
        })
    }
}

impl LogSink for LogUploader {
    fn send_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let url = Url::parse(&format!("{}{}", self.config.base_url, LOGS_ENDPOINT))
            .map_err(Error::InvalidBaseUrl)?;

        let count = entries.len();
        log::debug!(target: "driftballoon", count; "submitting log batch");
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&LogBatch { logs: entries })
            .send()?;

        match Error::from_status(response.status()) {
            None => Ok(()),
            Some(err) => {
                if matches!(err, Error::Unauthorized) {
                    log::warn!(target: "driftballoon", "client is not authorized. Check your API key");
                    self.unauthorized.store(true, Ordering::Relaxed);
                }
                Err(err)
            }
        }
    }
}
