//! Environment-based configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::bus::SubscribeOptions;

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Shared secret for post-receive hook signatures.
    pub hook_secret: Vec<u8>,

    /// This instance's consumer identity on the bus.
    pub consumer_id: String,

    /// Handler parallelism per subscription.
    pub bus_concurrency: usize,

    /// Redelivery budget per event.
    pub bus_max_retries: u32,

    /// Bound on a single handler invocation.
    pub bus_processing_timeout: Duration,

    /// How long an idle consumer waits before re-checking its queue.
    pub bus_idle_timeout: Duration,
}

impl Config {
    /// Reads configuration from `PULLSYNC_*` environment variables.
    /// `PULLSYNC_HOOK_SECRET` is required; everything else has a default.
    pub fn from_env() -> Result<Config, ConfigError> {
        let defaults = SubscribeOptions::default();
        Ok(Config {
            bind_addr: parse_var("PULLSYNC_BIND_ADDR", "127.0.0.1:3000".parse().unwrap())?,
            hook_secret: std::env::var("PULLSYNC_HOOK_SECRET")
                .map_err(|_| ConfigError::Missing("PULLSYNC_HOOK_SECRET"))?
                .into_bytes(),
            consumer_id: std::env::var("PULLSYNC_CONSUMER_ID")
                .unwrap_or_else(|_| "pullsync-1".to_string()),
            bus_concurrency: parse_var("PULLSYNC_BUS_CONCURRENCY", defaults.concurrency)?,
            bus_max_retries: parse_var("PULLSYNC_BUS_MAX_RETRIES", defaults.max_retries)?,
            bus_processing_timeout: parse_var(
                "PULLSYNC_BUS_PROCESSING_TIMEOUT_SECS",
                defaults.processing_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            bus_idle_timeout: parse_var(
                "PULLSYNC_BUS_IDLE_TIMEOUT_MS",
                defaults.idle_timeout.as_millis() as u64,
            )
            .map(Duration::from_millis)?,
        })
    }

    /// Subscription tuning derived from this configuration.
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::default()
            .with_concurrency(self.bus_concurrency)
            .with_max_retries(self.bus_max_retries)
            .with_processing_timeout(self.bus_processing_timeout)
            .with_idle_timeout(self.bus_idle_timeout)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}
