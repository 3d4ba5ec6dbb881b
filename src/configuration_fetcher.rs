//! An HTTP client that fetches prompt configuration from the server.
use std::time::Duration;

use reqwest::Url;

use crate::{
    configuration::{Configuration, ConfigurationResponse},
    Error, Result,
};

/// Default base URL for API calls.
pub const DEFAULT_BASE_URL: &str = "https://api.driftballoon.com";

/// Header carrying the API key on every request.
pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

pub(crate) const USER_AGENT: &str = concat!("driftballoon-rust/", env!("CARGO_PKG_VERSION"));

const CONFIG_ENDPOINT: &str = "/api/v1/config";

/// Anything the poller can pull a fresh [`Configuration`] snapshot from.
///
/// Implemented by [`ConfigurationFetcher`] for the real server, and by any compatible closure,
/// which is how tests substitute canned responses and failures.
pub trait ConfigurationSource: Send + 'static {
    /// Fetch the current full configuration set.
    fn fetch_configuration(&mut self) -> Result<Configuration>;
}

impl<F> ConfigurationSource for F
where
    F: FnMut() -> Result<Configuration> + Send + 'static,
{
    fn fetch_configuration(&mut self) -> Result<Configuration> {
        self()
    }
}

pub(crate) struct ConfigurationFetcherConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bound on each fetch request.
    pub timeout: Duration,
}

/// A client that fetches prompt configuration from the server.
pub(crate) struct ConfigurationFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    config: ConfigurationFetcherConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: bool,
}

impl ConfigurationFetcher {
    pub fn new(config: ConfigurationFetcherConfig) -> Result<ConfigurationFetcher> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(ConfigurationFetcher {
            client,
            config,
            unauthorized: false,
        })
    }
}

impl ConfigurationSource for ConfigurationFetcher {
    fn fetch_configuration(&mut self) -> Result<Configuration> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        let url = Url::parse(&format!("{}{}", self.config.base_url, CONFIG_ENDPOINT))
            .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "driftballoon", "fetching prompt configuration");
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()?;

        if let Some(err) = Error::from_status(response.status()) {
            if matches!(err, Error::Unauthorized) {
                log::warn!(target: "driftballoon", "client is not authorized. Check your API key");
                self.unauthorized = true;
            } else {
                log::warn!(target: "driftballoon", "received non-200 response while fetching new configuration: {:?}", response.status());
            }
            return Err(err);
        }

        let body: ConfigurationResponse = response.json()?;

        log::debug!(target: "driftballoon", "successfully fetched prompt configuration");

        Ok(Configuration::from_server_response(body))
    }
}
