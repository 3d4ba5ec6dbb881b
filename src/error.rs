use std::sync::Arc;

use reqwest::StatusCode;

/// Represents a result type for operations in the DriftBalloon SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// driftballoon-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the DriftBalloon SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The API key does not look like a DriftBalloon key. Keys are issued with a `db_sk_` prefix.
    #[error("invalid api_key format, expected a key starting with \"db_sk_\"")]
    InvalidApiKey,

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The server rejected the request as malformed. Retrying would produce the same outcome.
    #[error("request rejected by the server: {status}")]
    Rejected {
        /// HTTP status code returned by the server.
        status: StatusCode,
    },

    /// The server asked the client to slow down.
    #[error("rate limited by the server")]
    RateLimited,

    /// The server failed to process the request.
    #[error("server error: {status}")]
    Server {
        /// HTTP status code returned by the server.
        status: StatusCode,
    },

    /// An operation required running background workers, but the client hasn't been started.
    #[error("background workers are not running, call start() first")]
    NotStarted,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// Indicates that the uploader thread panicked. This should normally never happen.
    #[error("uploader thread panicked")]
    UploaderThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Whether a delivery attempt that failed with this error may succeed if repeated.
    ///
    /// Network failures, timeouts, rate limiting, and server errors are transient. Authorization
    /// and validation failures are not and are dropped without consuming the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited | Error::Server { .. } | Error::Io(_) | Error::Network(_)
        )
    }

    /// Classify an HTTP response status. Returns `None` for successful statuses.
    pub(crate) fn from_status(status: StatusCode) -> Option<Error> {
        if status.is_success() {
            None
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Some(Error::Unauthorized)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(Error::RateLimited)
        } else if status.is_client_error() {
            Some(Error::Rejected { status })
        } else {
            Some(Error::Server { status })
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
