//! The Rust SDK for DriftBalloon, a drift-detection and observability platform for LLM outputs.
//!
//! # Overview
//!
//! The SDK revolves around a [`DriftBalloonClient`] that ships logged LLM responses to the
//! DriftBalloon service and keeps a locally cached view of server-assigned prompt configuration
//! (active variant, baseline readiness).
//!
//! [`DriftBalloonClient::log`] returns a [`LogTask`]: call [`LogTask::submit`] for
//! fire-and-forget delivery through a background queue with retry and backoff, or
//! [`LogTask::invoke`] to block until the server confirms receipt. Reads
//! ([`DriftBalloonClient::get_config`], [`DriftBalloonClient::get_active_prompt`],
//! [`DriftBalloonClient::get_baseline_status`]) are served purely from the local cache, which a
//! background loop refreshes every 30 seconds; when the network or server is down, reads keep
//! returning the last known data.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Failures originating from the network or server are never raised into the host application:
//! fire-and-forget submissions are retried and eventually dropped with a counter incremented
//! (see [`DriftBalloonClient::stats`]), and failed syncs leave the cache serving stale data. The
//! errors you can observe synchronously are caller mistakes (malformed API key, invalid base
//! URL) and the terminal outcome of an explicit [`LogTask::invoke`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages
//! under the `driftballoon` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # fn test() -> driftballoon::Result<()> {
//! let client = driftballoon::ClientConfig::from_api_key("db_sk_example").to_client()?;
//!
//! // After each LLM call — fire-and-forget.
//! client
//!     .log("summarizer", "the model response")
//!     .prompt("Summarize this article")
//!     .model("gpt-4")
//!     .submit();
//!
//! // Which prompt variant does the server currently designate?
//! let active = client.get_active_prompt("summarizer");
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod baseline_tracker;
mod client;
mod config;
mod configuration;
mod configuration_fetcher;
mod configuration_store;
mod error;
mod log_entry;
mod log_queue;
mod log_task;
mod log_uploader;
mod poller_thread;
mod retry;
mod uploader_thread;

pub use client::DriftBalloonClient;
pub use config::ClientConfig;
pub use configuration::{ActiveVariant, BaselineStatus, Configuration, PromptConfig};
pub use configuration_fetcher::DEFAULT_BASE_URL;
pub use error::{Error, Result};
pub use log_entry::LogEntry;
pub use log_queue::DeliveryStatsSnapshot;
pub use log_task::LogTask;
pub use retry::RetryPolicy;
