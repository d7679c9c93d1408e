//! Configuration types for the chain session SDK

use crate::error::{Result, SdkError};
pub use crate::types::{Endpoint, RetryPolicy, TransportKind};
use std::time::Duration;

/// Default per-endpoint connection timeout (10 seconds)
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Default delay between connect rounds and before a reconnect
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Default number of extra rounds over the endpoint pool
const DEFAULT_MAX_RECONNECT_ROUNDS: u32 = 3;

/// Generic Substrate address format
const DEFAULT_SS58_FORMAT: u16 = 42;

/// Block polling interval for request-response endpoints
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// SDK Configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidate nodes, in preference order
    pub endpoints: Vec<Endpoint>,

    /// Bound on opening a transport and on waiting for it to become ready
    pub connection_timeout: Duration,

    /// Inter-round delay during connect and settle delay before a reconnect
    pub reconnect_delay: Duration,

    /// Rounds after the first; a connect makes `endpoints * (rounds + 1)` attempts at most
    pub max_reconnect_rounds: u32,

    /// Address format; passed through to signers, not interpreted here
    pub ss58_format: u16,

    /// Client-wide default retry policy for submissions
    pub retry: RetryPolicy,

    /// How often request-response endpoints are polled for inclusion
    pub poll_interval: Duration,
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a configuration from `CHAIN_*` environment variables
    pub fn from_env() -> Result<Config> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        fn number<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
            value
                .map(|v| {
                    v.trim()
                        .parse::<T>()
                        .map_err(|_| SdkError::config(format!("{} is not a valid number: {}", key, v)))
                })
                .transpose()
        }

        let mut builder = Config::builder();

        if let Some(list) = lookup("CHAIN_RPC_ENDPOINTS") {
            for url in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                builder = builder.endpoint(url);
            }
        }
        if let Some(ms) = number::<u64>("CHAIN_CONNECTION_TIMEOUT_MS", lookup("CHAIN_CONNECTION_TIMEOUT_MS"))? {
            builder = builder.connection_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = number::<u64>("CHAIN_RECONNECT_DELAY_MS", lookup("CHAIN_RECONNECT_DELAY_MS"))? {
            builder = builder.reconnect_delay(Duration::from_millis(ms));
        }
        if let Some(rounds) = number::<u32>("CHAIN_MAX_RECONNECT_ROUNDS", lookup("CHAIN_MAX_RECONNECT_ROUNDS"))? {
            builder = builder.max_reconnect_rounds(rounds);
        }
        if let Some(format) = number::<u16>("CHAIN_SS58_FORMAT", lookup("CHAIN_SS58_FORMAT"))? {
            builder = builder.ss58_format(format);
        }
        if let Some(retries) = number::<u32>("CHAIN_MAX_RETRIES", lookup("CHAIN_MAX_RETRIES"))? {
            builder = builder.max_retries(retries);
        }
        if let Some(ms) = number::<u64>("CHAIN_RETRY_DELAY_MS", lookup("CHAIN_RETRY_DELAY_MS"))? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(SdkError::config("at least one endpoint is required"));
        }
        if self.connection_timeout.is_zero() {
            return Err(SdkError::config("connection_timeout must be greater than zero"));
        }
        if self.retry.max_retries == 0 {
            return Err(SdkError::config("max_retries must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(SdkError::config("poll_interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration builder for ergonomic config creation
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    endpoints: Vec<String>,
    connection_timeout: Option<Duration>,
    reconnect_delay: Option<Duration>,
    max_reconnect_rounds: Option<u32>,
    ss58_format: Option<u16>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    poll_interval: Option<Duration>,
}

impl ConfigBuilder {
    /// Append a candidate endpoint (ws, wss, http or https)
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoints.push(url.into());
        self
    }

    /// Replace the endpoint list
    pub fn endpoints<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set per-endpoint connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Set the inter-round and reconnect settle delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Set how many extra rounds a connect makes over the pool
    pub fn max_reconnect_rounds(mut self, rounds: u32) -> Self {
        self.max_reconnect_rounds = Some(rounds);
        self
    }

    pub fn ss58_format(mut self, format: u16) -> Self {
        self.ss58_format = Some(format);
        self
    }

    /// Set default submission attempts
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set default base retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the block polling interval for request-response endpoints
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let endpoints = self
            .endpoints
            .iter()
            .map(|url| Endpoint::parse(url))
            .collect::<Result<Vec<_>>>()?;

        let config = Config {
            endpoints,
            connection_timeout: self
                .connection_timeout
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS)),
            reconnect_delay: self
                .reconnect_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)),
            max_reconnect_rounds: self.max_reconnect_rounds.unwrap_or(DEFAULT_MAX_RECONNECT_ROUNDS),
            ss58_format: self.ss58_format.unwrap_or(DEFAULT_SS58_FORMAT),
            retry: RetryPolicy::new(
                self.max_retries.unwrap_or(RetryPolicy::default().max_retries),
                self.retry_delay
                    .unwrap_or(RetryPolicy::default().retry_delay_base),
            ),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
        };

        config.validate()?;
        Ok(config)
    }
}
